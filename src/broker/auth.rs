use futures::future::BoxFuture;

/// Credential check supplied by the embedding application.
///
/// Without an authenticator every CONNECT is accepted. An absent user name
/// or password is passed as an empty slice.
pub trait Authenticator: Send + Sync {
    fn authenticate<'a>(&'a self, username: &'a [u8], password: &'a [u8]) -> BoxFuture<'a, bool>;
}

/// Accepts exactly one user name and password pair.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl StaticAuthenticator {
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate<'a>(&'a self, username: &'a [u8], password: &'a [u8]) -> BoxFuture<'a, bool> {
        let ok = username == self.username.as_slice() && password == self.password.as_slice();
        Box::pin(async move { ok })
    }
}
