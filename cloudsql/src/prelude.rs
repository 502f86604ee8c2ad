//! Internal prelude for commonly used crate utilities.

#[allow(unused_imports)]
pub(crate) use crate::observability::{log_debug as debug, log_info as info, log_warn as warn};
