pub mod init;
pub mod serve;
pub mod tree;
pub mod watch;
