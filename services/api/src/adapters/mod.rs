pub mod db;
pub mod stripe;

pub use db::DbAdapter;
pub use stripe::StripeGateway;
