use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Bearer token payload. `sub` carries the owner id.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}
