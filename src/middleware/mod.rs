mod auth;

pub use auth::RequireAdminAuth;
