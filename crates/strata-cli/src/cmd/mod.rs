pub(crate) mod break_lock;
pub(crate) mod init;
pub(crate) mod rewrite;
