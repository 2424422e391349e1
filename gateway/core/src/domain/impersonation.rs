// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Impersonation scope.
//!
//! The effective user of a privileged call lives in a task-local slot for
//! the duration of one future. Cluster bindings read it when they open a
//! handle; nothing outside the scoped future observes it.

use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// User the cluster operation is performed as.
    pub effective_user: String,
    /// Identity the gateway itself logged in with.
    pub real_user: String,
}

impl UserContext {
    pub fn new(effective_user: impl Into<String>, real_user: impl Into<String>) -> Self {
        Self {
            effective_user: effective_user.into(),
            real_user: real_user.into(),
        }
    }

    pub fn is_proxied(&self) -> bool {
        self.effective_user != self.real_user
    }
}

tokio::task_local! {
    static CURRENT_USER: UserContext;
}

/// Run `fut` with `ctx` as the effective user.
pub async fn run_as<F>(ctx: UserContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_USER.scope(ctx, fut).await
}

/// Effective user of the enclosing `run_as` scope, if any.
pub fn current_user() -> Option<UserContext> {
    CURRENT_USER.try_with(|ctx| ctx.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_is_limited_to_future() {
        assert!(current_user().is_none());

        let seen = run_as(UserContext::new("alice", "fsgate"), async { current_user() }).await;
        let seen = seen.unwrap();
        assert_eq!(seen.effective_user, "alice");
        assert!(seen.is_proxied());

        assert!(current_user().is_none());
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_outer() {
        let inner = run_as(UserContext::new("alice", "fsgate"), async {
            let nested = run_as(UserContext::new("bob", "fsgate"), async { current_user() }).await;
            (nested, current_user())
        })
        .await;

        assert_eq!(inner.0.unwrap().effective_user, "bob");
        assert_eq!(inner.1.unwrap().effective_user, "alice");
    }
}
