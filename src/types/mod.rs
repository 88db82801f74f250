pub mod channel;
pub mod log;
pub mod redemption;
pub mod token;
pub mod user;

pub use channel::*;
pub use log::*;
pub use redemption::*;
pub use token::*;
pub use user::*;
