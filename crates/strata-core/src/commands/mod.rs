pub mod break_lock;
pub mod init;
pub mod rewrite;
pub mod util;
