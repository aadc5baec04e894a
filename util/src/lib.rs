pub mod interceptor;
pub mod security;
pub mod soap;
pub mod value;
pub mod xml;
