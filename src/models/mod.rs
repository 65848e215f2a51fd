pub mod driver;
pub mod trip;
