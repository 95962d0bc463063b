pub(crate) mod errors;
pub(crate) mod outcome;
