use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use thiserror::Error;
use ulid::Ulid;

use crate::model::Principal;

const OPERATOR_PREFIX: &str = "operator:";

#[derive(Debug)]
pub struct BayplanAuthSource {
    password: String,
}

impl BayplanAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for BayplanAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("no user given at startup")]
    Missing,
    #[error("user {0:?} is not a ULID or operator:<ULID>")]
    Malformed(String),
}

/// The startup user names the caller: `<ulid>` for a customer,
/// `operator:<ulid>` for garage staff.
pub fn parse_principal(user: Option<&str>) -> Result<Principal, PrincipalError> {
    let user = user.map(str::trim).filter(|u| !u.is_empty()).ok_or(PrincipalError::Missing)?;
    let malformed = || PrincipalError::Malformed(user.to_string());
    match user.strip_prefix(OPERATOR_PREFIX) {
        Some(id) => Ulid::from_string(id).map(Principal::operator).map_err(|_| malformed()),
        None => Ulid::from_string(user).map(Principal::user).map_err(|_| malformed()),
    }
}
