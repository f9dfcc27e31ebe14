use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub creator_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One text variant of a post, potentially aimed at several networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub post_id: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub post_id: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub name: String,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGrant {
    pub network_id: String,
    pub grantee_id: String,
    pub granter_id: String,
    pub permission: String,
    pub created_at: String,
}
