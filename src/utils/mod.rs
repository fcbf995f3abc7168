pub(crate) mod external;
pub(crate) mod keys;
pub(crate) mod report;
