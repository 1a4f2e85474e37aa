mod health;
mod metrics;
mod login;
mod contact;
mod vote;
mod quota;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use login::login_handler;
pub use contact::contact_handler;
pub use vote::{vote_handler, votes_handler};
pub use quota::quota_handler;
