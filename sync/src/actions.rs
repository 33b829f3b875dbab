//! Writes and auth operations issued through a session.
//!
//! None of these return errors. Progress and failures land in the mirror:
//! write ids under `writes.processing`, write failures under
//! `writes.errors`, auth progress and failures in the per-operation slots.
//! Recorded errors stay until the matching `clear_*` call.

use std::sync::Arc;

use chrono::Utc;
use mirror_engine::{
    normalize_path, AuthSlot, ErrorSlot, MirrorAction, RemoteError, WriteError, WriteId,
};
use serde_json::Value;
use uuid::Uuid;

use crate::remote::{Completion, RemoteStore, WriteRequest};
use crate::session::SyncSession;
use crate::store::State;

impl<S: State> SyncSession<S> {
    /// Send a write to the remote, tracking it under its path.
    pub fn write(&self, request: WriteRequest) -> WriteId {
        let id = Uuid::new_v4().to_string();
        let path = normalize_path(&request.path).unwrap_or_else(|_| request.path.clone());
        let store = Arc::clone(&self.inner.store);

        tracing::debug!(write_id = %id, path = %path, method = ?request.method, "Sending write");
        store.dispatch(MirrorAction::WriteProcessingUpdated {
            path: path.clone(),
            id: id.clone(),
            value: true,
        });

        let write_id = id.clone();
        self.inner.remote.write(
            request,
            Box::new(move |result: Result<(), RemoteError>| {
                if let Err(error) = result {
                    tracing::warn!(write_id = %write_id, path = %path, error = %error, "Write failed");
                    store.dispatch(MirrorAction::WriteErrorsUpdated {
                        path: path.clone(),
                        error: Some(WriteError {
                            write_id: write_id.clone(),
                            error,
                            failed_at: Utc::now().timestamp_millis().max(0) as u64,
                        }),
                    });
                }
                store.dispatch(MirrorAction::WriteProcessingUpdated {
                    path,
                    id: write_id,
                    value: false,
                });
            }),
        );
        id
    }

    pub fn set(&self, path: &str, value: Value) -> WriteId {
        self.write(WriteRequest::set(path, value))
    }

    /// Merge the direct children of `value` into the location.
    pub fn update(&self, path: &str, value: Value) -> WriteId {
        self.write(WriteRequest::update(path, value))
    }

    pub fn push(&self, path: &str, value: Value) -> WriteId {
        self.write(WriteRequest::push(path, value))
    }

    pub fn remove(&self, path: &str) -> WriteId {
        self.write(WriteRequest::remove(path))
    }

    /// Drop every write error recorded for a path.
    pub fn clear_write_errors(&self, path: &str) {
        let path = normalize_path(path).unwrap_or_else(|_| path.to_string());
        self.inner
            .store
            .dispatch(MirrorAction::WriteErrorsUpdated { path, error: None });
    }

    pub fn password_login(&self, email: &str, password: &str) {
        self.run_auth(AuthSlot::Login, |remote, done| {
            remote.password_login(email, password, done)
        });
    }

    pub fn provider_login(&self, provider: &str, scopes: &[String]) {
        self.run_auth(AuthSlot::Login, |remote, done| {
            remote.provider_login(provider, scopes, done)
        });
    }

    pub fn create_user(&self, email: &str, password: &str) {
        self.run_auth(AuthSlot::CreateUser, |remote, done| {
            remote.create_user(email, password, done)
        });
    }

    pub fn reset_password(&self, email: &str) {
        self.run_auth(AuthSlot::ResetPassword, |remote, done| {
            remote.reset_password(email, done)
        });
    }

    /// Sign out. The mirror follows the remote auth signal.
    pub fn logout(&self) {
        self.inner.remote.logout(Box::new(|result: Result<(), RemoteError>| {
            if let Err(error) = result {
                tracing::warn!(error = %error, "Logout failed");
            }
        }));
    }

    pub fn clear_login_error(&self) {
        self.clear_error(ErrorSlot::Login);
    }

    pub fn clear_registration_error(&self) {
        self.clear_error(ErrorSlot::CreateUser);
    }

    pub fn clear_reset_password_error(&self) {
        self.clear_error(ErrorSlot::ResetPassword);
    }

    pub fn clear_permissions_error(&self) {
        self.clear_error(ErrorSlot::Permissions);
    }

    fn clear_error(&self, slot: ErrorSlot) {
        self.inner
            .store
            .dispatch(MirrorAction::ErrorUpdated { slot, error: None });
    }

    fn run_auth<F>(&self, slot: AuthSlot, call: F)
    where
        F: FnOnce(&dyn RemoteStore, Completion),
    {
        let store = Arc::clone(&self.inner.store);
        store.dispatch(MirrorAction::ProcessingUpdated { slot, value: true });
        store.dispatch(MirrorAction::CompletedUpdated { slot, value: false });

        let done: Completion = Box::new(move |result: Result<(), RemoteError>| {
            match result {
                Ok(()) => store.dispatch(MirrorAction::CompletedUpdated { slot, value: true }),
                Err(error) => {
                    tracing::warn!(slot = ?slot, error = %error, "Auth operation failed");
                    store.dispatch(MirrorAction::ErrorUpdated {
                        slot: slot.into(),
                        error: Some(error),
                    });
                }
            }
            store.dispatch(MirrorAction::ProcessingUpdated { slot, value: false });
        });
        call(&*self.inner.remote, done);
    }
}
