#![allow(dead_code)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unnecessary_wraps)]

pub(crate) mod fd;
pub(crate) mod process;
pub(crate) mod signal;
