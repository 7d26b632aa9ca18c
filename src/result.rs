use std::result;

use crate::error::PathError;

pub type Result<T> = result::Result<T, PathError>;
