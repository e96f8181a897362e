use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "Acme")]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 1024))]
    pub description: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AcceptInviteRequest {
    #[validate(length(min = 1, message = "Invite id is required"))]
    pub id: String,

    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}
