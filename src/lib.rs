pub mod debugger;
pub mod log;

pub use debugger::Debugger;
pub use debugger::remote::RemoteClient;
