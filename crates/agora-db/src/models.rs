/// Database row types that have no counterpart in agora-types.
/// Poll entities are mapped straight into `agora_types::models`.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct QuestionListRow {
    pub question: agora_types::models::Question,
    pub choice_count: u64,
}
