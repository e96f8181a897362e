use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::models::Effect;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PolicyRequest {
    #[validate(length(min = 1, max = 512, message = "Resource is required"))]
    #[schema(example = "/org/550e8400-e29b-41d4-a716-446655440000*")]
    pub resource: String,

    #[validate(length(min = 1, max = 64, message = "Action is required"))]
    #[schema(example = "read")]
    pub action: String,

    pub effect: Effect,
}
