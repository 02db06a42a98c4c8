//! The authenticated session: holds the master key between unlock and logout.

use fieldcase_crypto::{
    create_verification_token, derive_master_key, verify_master_key, KdfParams, MasterKey,
    DEPLOYMENT_SALT,
};
use parking_lot::RwLock;

use crate::error::{Error, SessionError};

/// In-memory holder of the active [`MasterKey`].
///
/// The key never leaves this process in unwrapped form. [`Session::lock`]
/// drops it, which zeroes the bytes.
pub struct Session {
    master_key: RwLock<Option<MasterKey>>,
}

impl Session {
    /// Wrap a key supplied by an external authentication flow.
    pub fn from_master_key(master_key: MasterKey) -> Self {
        Self {
            master_key: RwLock::new(Some(master_key)),
        }
    }

    /// Derive the master key from `password` and check it against the
    /// stored verification token.
    ///
    /// Every failure, whether in derivation or verification, is reported as
    /// [`SessionError::CannotUnlock`].
    pub async fn unlock(
        password: &str,
        verification_token: &str,
        params: KdfParams,
    ) -> Result<Self, SessionError> {
        let password = zeroize::Zeroizing::new(password.to_owned());
        let token = verification_token.to_owned();
        let verified = tokio::task::spawn_blocking(move || {
            let key = derive_master_key(&password, &DEPLOYMENT_SALT, &params)
                .map_err(|e| tracing::warn!(error = %e, "master key derivation failed"))
                .ok()?;
            verify_master_key(&token, &key).then_some(key)
        })
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "unlock worker did not complete");
            SessionError::CannotUnlock
        })?;

        match verified {
            Some(key) => {
                tracing::info!("session unlocked");
                Ok(Self::from_master_key(key))
            }
            None => Err(SessionError::CannotUnlock),
        }
    }

    /// First-time setup: derive the key and produce the verification token
    /// to store alongside the account.
    pub async fn enroll(password: &str, params: KdfParams) -> crate::Result<(Self, String)> {
        let password = zeroize::Zeroizing::new(password.to_owned());
        let (key, token) = tokio::task::spawn_blocking(move || {
            let key = derive_master_key(&password, &DEPLOYMENT_SALT, &params)?;
            let token = create_verification_token(&key)?;
            Ok::<_, Error>((key, token))
        })
        .await
        .map_err(|_| SessionError::CannotUnlock)??;
        tracing::info!("session enrolled");
        Ok((Self::from_master_key(key), token))
    }

    /// Run `f` with the master key. Fails with [`SessionError::Locked`] after
    /// [`lock`](Self::lock).
    pub fn with_master_key<T>(&self, f: impl FnOnce(&MasterKey) -> T) -> Result<T, SessionError> {
        let guard = self.master_key.read();
        guard.as_ref().map(f).ok_or(SessionError::Locked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.master_key.read().is_some()
    }

    /// Discard the master key. Idempotent.
    pub fn lock(&self) {
        if self.master_key.write().take().is_some() {
            tracing::info!("session locked");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
