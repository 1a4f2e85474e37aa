use serde::{Deserialize, Serialize};

// Login form posted by the admin page
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// Contact form
#[derive(Deserialize, Debug)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
}

// The two ways a supporter can vote
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Support,
    Oppose,
}

#[derive(Deserialize, Debug)]
pub struct VoteRequest {
    pub kind: VoteKind,
}

// Running vote totals
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub support: u64,
    pub oppose: u64,
}

// Query for the quota endpoint
#[derive(Deserialize, Debug)]
pub struct QuotaQuery {
    pub path: Option<String>,
}

// Caller's quota without spending a request
#[derive(Serialize, Deserialize, Debug)]
pub struct QuotaResponse {
    pub limit: u32,
    pub remaining: u32,
    pub reset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
