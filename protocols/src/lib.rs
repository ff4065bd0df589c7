pub mod banner;
pub mod http;
pub mod services;
pub mod tls;
