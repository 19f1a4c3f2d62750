use crate::application::ports::user_repository::UserRepository;
use crate::domain::users::User;
use crate::infrastructure::crypto;

pub struct Login<'a, R: UserRepository + ?Sized> {
    pub repo: &'a R,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl<'a, R: UserRepository + ?Sized> Login<'a, R> {
    /// `Ok(None)` for an unknown email or a wrong password alike.
    pub async fn execute(&self, req: &LoginRequest) -> anyhow::Result<Option<User>> {
        let user = match self.repo.find_by_email(&req.email).await? {
            Some(u) => u,
            None => return Ok(None),
        };
        if crypto::verify_password(&req.password, &user.password) {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}
