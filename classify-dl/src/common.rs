//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use chrono::{DateTime, Local};
pub use image::{imageops::FilterType, DynamicImage, RgbImage};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use log::{info, warn};
pub use rand::{prelude::*, rngs::StdRng};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    collections::VecDeque,
    fmt::{self, Debug, Display, Formatter},
    fs,
    iter::Sum,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
pub use tch::{
    nn::{self, ModuleT as _, OptimizerConfig as _},
    Device, IndexOp as _, Kind, Reduction, Tensor,
};

pub type Fallible<T> = Result<T, Error>;
