pub mod request_log;

pub use request_log::Entity as RequestLog;
