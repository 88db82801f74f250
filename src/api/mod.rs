mod channel;
mod misc;
mod redemption;

// Channel management and health probes
pub use channel::{
    api_delete_disabled_channels, api_get_channels, api_post_channels, api_put_channel_balance,
    api_test_all_channels, api_test_channel,
};
// Status, logs and options
pub use misc::{
    api_auth, api_delete_logs, api_get_log_stat, api_get_logs, api_put_option, api_status,
    api_version,
};
// Redemption codes
pub use redemption::{api_get_redemption, api_post_redemptions, api_redeem};
