//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use chrono::{DateTime, Local};
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use structopt::StructOpt;
pub use tch::{nn, Device, Reduction, Tensor};
pub use tracing::{info, warn};

pub type Fallible<T> = Result<T, Error>;
