use async_trait::async_trait;

use crate::application::query::SortOrder;
use crate::domain::users::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSortField {
    Id,
    Email,
    DateOfBirth,
    CreatedAt,
    UpdatedAt,
}

impl UserSortField {
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "id" => Some(Self::Id),
            "email" => Some(Self::Email),
            "dateOfBirth" => Some(Self::DateOfBirth),
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Email => "email",
            Self::DateOfBirth => "date_of_birth",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Conjunction of filters; `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub ids: Option<Vec<String>>,
    pub emails: Option<Vec<String>>,
    /// Each entry matches users having at least one of its hobbies; all
    /// entries must match.
    pub hobbies: Vec<Vec<String>>,
}

impl UserFilter {

    pub fn matches(&self, user: &User) -> bool {
        let ids = self.ids.as_ref().is_none_or(|ids| ids.contains(&user.id));
        let emails = self
            .emails
            .as_ref()
            .is_none_or(|emails| emails.contains(&user.email));
        let hobbies = self
            .hobbies
            .iter()
            .all(|wanted| user.hobbies.iter().any(|h| wanted.contains(h)));
        ids && emails && hobbies
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserListQuery {
    pub filter: UserFilter,
    pub sort: Vec<(UserSortField, SortOrder)>,
    /// `None` lists every match.
    pub limit: Option<usize>,
    pub skip: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    NotFound,
    /// Id or email already taken by another user.
    Duplicate,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: &User) -> anyhow::Result<WriteOutcome>;
    async fn replace(&self, user: &User) -> anyhow::Result<WriteOutcome>;
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn list(&self, query: &UserListQuery) -> anyhow::Result<Vec<User>>;
    async fn count(&self, filter: &UserFilter) -> anyhow::Result<u64>;
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
}
