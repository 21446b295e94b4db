pub mod command;
pub mod fastx;
pub mod file;
pub mod naming;
pub mod paths;
pub mod sambam;
pub mod stats;
pub mod system;
pub mod table;
