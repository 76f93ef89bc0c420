//! Engine scenarios over the in-memory store.
//!
//! Tests: SignUp → SignIn → VerifySession → page access / role administration
//!
//! Verifies:
//! - Credentials and sessions behave as a unit (expiry, deleted accounts)
//! - Grant-set replacement is atomic with respect to concurrent readers
//! - Privilege rules are evaluated against current state, not token contents

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use orgdesk_auth::{
        ALWAYS_ALLOWED, CoarsePermission, Page, PageSet, PasswordHasher, Principal, RoleDraft,
        RolePatch, RoleStatus, SessionSigner, UserPatch,
    };
    use orgdesk_core::RoleId;

    use crate::engine::{AuthEngine, AuthError, Invitation};
    use crate::store::{CredentialStore, InMemoryStore, RoleDeletePolicy, RoleRegistry};

    const PASSWORD: &str = "correct horse battery";

    type Engine = AuthEngine<Arc<InMemoryStore>>;

    fn engine() -> Engine {
        engine_with_policy(RoleDeletePolicy::Restrict)
    }

    fn engine_with_policy(policy: RoleDeletePolicy) -> Engine {
        AuthEngine::new(
            Arc::new(InMemoryStore::new()),
            SessionSigner::new(b"integration-secret").unwrap(),
            PasswordHasher::new(4).unwrap(),
        )
        .with_delete_policy(policy)
    }

    async fn user(engine: &Engine, email: &str) -> Principal {
        let signed_up = engine.sign_up(email, PASSWORD).await.unwrap();
        Principal::from(signed_up)
    }

    async fn admin(engine: &Engine, email: &str) -> Principal {
        let principal = user(engine, email).await;
        let promote = UserPatch {
            permission: Some(CoarsePermission::Admin),
            ..Default::default()
        };
        let record = engine
            .store()
            .update_user(principal.user_id, &promote)
            .await
            .unwrap()
            .unwrap();
        Principal::from(record.to_user())
    }

    fn draft(name: &str, pages: &[Page]) -> RoleDraft {
        RoleDraft::new(name, None, RoleStatus::Active, pages.iter().copied().collect()).unwrap()
    }

    async fn assign(engine: &Engine, admin: &Principal, target: &Principal, role: RoleId) -> Principal {
        let patch = UserPatch {
            role_id: Some(Some(role)),
            ..Default::default()
        };
        Principal::from(engine.update_user(admin, target.user_id, patch).await.unwrap())
    }

    // ---- credentials & sessions ----

    #[tokio::test]
    async fn sign_in_succeeds_only_after_matching_sign_up() {
        let engine = engine();

        assert!(matches!(
            engine.sign_in("alice@example.com", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));

        let created = engine.sign_up(" Alice@Example.com ", PASSWORD).await.unwrap();
        assert_eq!(created.email, "alice@example.com");
        assert_eq!(created.permission, CoarsePermission::User);
        assert_eq!(created.role_id, None);

        let signed_in = engine.sign_in("ALICE@example.com", PASSWORD).await.unwrap();
        assert_eq!(signed_in.user.id, created.id);
        assert!(signed_in.expires_at > Utc::now());

        assert!(matches!(
            engine.sign_in("alice@example.com", "wrong password").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicates_and_bad_input() {
        let engine = engine();
        engine.sign_up("alice@example.com", PASSWORD).await.unwrap();

        assert!(matches!(
            engine.sign_up("ALICE@example.com", PASSWORD).await,
            Err(AuthError::AlreadyExists(_))
        ));
        assert!(matches!(
            engine.sign_up("not-an-email", PASSWORD).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            engine.sign_up("bob@example.com", "short").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ups_with_same_email_admit_exactly_one() {
        let engine = Arc::new(engine());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.sign_up("race@example.com", PASSWORD).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AuthError::AlreadyExists(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(engine.store().list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_is_valid_until_expiry() {
        let engine = engine();
        let created = engine.sign_up("alice@example.com", PASSWORD).await.unwrap();
        let signed_in = engine.sign_in("alice@example.com", PASSWORD).await.unwrap();

        let principal = engine.verify_session(&signed_in.token).await.unwrap();
        assert_eq!(principal.user_id, created.id);
        assert_eq!(principal.permission, CoarsePermission::User);

        let later = signed_in.expires_at + Duration::seconds(1);
        assert!(matches!(
            engine.verify_session_at(&signed_in.token, later).await,
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(
            engine.verify_session("garbage").await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn session_is_rejected_after_account_deletion() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        engine.sign_up("alice@example.com", PASSWORD).await.unwrap();
        let signed_in = engine.sign_in("alice@example.com", PASSWORD).await.unwrap();

        engine.delete_user(&root, signed_in.user.id).await.unwrap();

        assert!(matches!(
            engine.verify_session(&signed_in.token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn verified_session_reflects_current_row_not_token() {
        let engine = engine();
        engine.sign_up("alice@example.com", PASSWORD).await.unwrap();
        let signed_in = engine.sign_in("alice@example.com", PASSWORD).await.unwrap();

        let promote = UserPatch {
            permission: Some(CoarsePermission::Admin),
            ..Default::default()
        };
        engine
            .store()
            .update_user(signed_in.user.id, &promote)
            .await
            .unwrap();

        let principal = engine.verify_session(&signed_in.token).await.unwrap();
        assert!(principal.is_admin());
    }

    // ---- page access ----

    #[tokio::test]
    async fn admin_is_allowed_every_page() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;

        for page in Page::ALL {
            assert!(engine.check_page_access(&root, page).await, "{page}");
        }
        assert_eq!(engine.allowed_pages(&root).await.len(), Page::ALL.len());
    }

    #[tokio::test]
    async fn user_without_role_reaches_only_minimal_set() {
        let engine = engine();
        let alice = user(&engine, "alice@example.com").await;

        for page in Page::ALL {
            assert_eq!(
                engine.check_page_access(&alice, page).await,
                ALWAYS_ALLOWED.contains(&page),
                "{page}"
            );
        }
        assert_eq!(
            engine.allowed_pages(&alice).await,
            ALWAYS_ALLOWED.into_iter().collect::<PageSet>()
        );
    }

    #[tokio::test]
    async fn viewer_role_grant_and_revoke() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;

        let viewer = engine
            .create_role(&root, draft("Viewer", &[Page::Companies]))
            .await
            .unwrap();
        let alice = assign(&engine, &root, &alice, viewer.role.id).await;

        assert!(engine.check_page_access(&alice, Page::Companies).await);
        assert!(!engine.check_page_access(&alice, Page::Users).await);

        let revoke = RolePatch {
            pages: Some(PageSet::new()),
            ..Default::default()
        };
        engine.update_role(&root, viewer.role.id, revoke).await.unwrap();

        assert!(!engine.check_page_access(&alice, Page::Companies).await);
        assert!(engine.check_page_access(&alice, Page::Home).await);
    }

    #[tokio::test]
    async fn narrowing_viewer_grants_keeps_the_remaining_page() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;

        let viewer = engine
            .create_role(&root, draft("Viewer", &[Page::Companies, Page::Help]))
            .await
            .unwrap();
        let alice = assign(&engine, &root, &alice, viewer.role.id).await;
        assert!(engine.check_page_access(&alice, Page::Companies).await);

        let narrow = RolePatch {
            pages: Some(PageSet::from([Page::Help])),
            ..Default::default()
        };
        let updated = engine.update_role(&root, viewer.role.id, narrow).await.unwrap();
        assert_eq!(updated.pages, PageSet::from([Page::Help]));
        assert_eq!(
            engine.get_role(viewer.role.id).await.unwrap().pages,
            PageSet::from([Page::Help])
        );

        assert!(engine.check_page_access(&alice, Page::Help).await);
        assert!(!engine.check_page_access(&alice, Page::Companies).await);
        assert!(engine.allowed_pages(&alice).await.contains(&Page::Help));
    }

    #[tokio::test]
    async fn deleted_account_is_denied_everything() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;

        engine.delete_user(&root, alice.user_id).await.unwrap();

        assert!(!engine.check_page_access(&alice, Page::Home).await);
        assert!(engine.allowed_pages(&alice).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn grant_replacement_is_never_observed_half_done() {
        let engine = Arc::new(engine());
        let root = admin(&engine, "root@example.com").await;
        let role = engine
            .create_role(&root, draft("Editor", &[Page::Companies, Page::Users]))
            .await
            .unwrap();
        let role_id = role.role.id;

        let before = PageSet::from([Page::Companies, Page::Users]);
        let after = PageSet::from([Page::Users, Page::Settings]);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let (before, after) = (before.clone(), after.clone());
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let seen = engine.store().role_grants(role_id).await.unwrap().unwrap();
                        assert!(seen == before || seen == after, "observed {seen:?}");
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let patch = RolePatch {
            pages: Some(after.clone()),
            ..Default::default()
        };
        let updated = engine.update_role(&root, role_id, patch).await.unwrap();
        assert_eq!(updated.pages, after);

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(engine.get_role(role_id).await.unwrap().pages, after);
    }

    // ---- user administration ----

    #[tokio::test]
    async fn non_admin_cannot_escalate_themselves() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[Page::Companies])).await.unwrap();

        let escalate = UserPatch {
            permission: Some(CoarsePermission::Admin),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&alice, alice.user_id, escalate).await,
            Err(AuthError::PermissionDenied(_))
        ));

        let self_assign = UserPatch {
            role_id: Some(Some(role.role.id)),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&alice, alice.user_id, self_assign).await,
            Err(AuthError::PermissionDenied(_))
        ));

        let current = engine.get_user(&alice, alice.user_id).await.unwrap();
        assert_eq!(current.permission, CoarsePermission::User);
        assert_eq!(current.role_id, None);
    }

    #[tokio::test]
    async fn non_admin_may_change_own_email() {
        let engine = engine();
        let alice = user(&engine, "alice@example.com").await;
        user(&engine, "bob@example.com").await;

        let patch = UserPatch {
            email: Some("Alice.New@Example.com".to_string()),
            ..Default::default()
        };
        let updated = engine.update_user(&alice, alice.user_id, patch).await.unwrap();
        assert_eq!(updated.email, "alice.new@example.com");
        assert!(engine.sign_in("alice.new@example.com", PASSWORD).await.is_ok());

        let collide = UserPatch {
            email: Some("bob@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&alice, alice.user_id, collide).await,
            Err(AuthError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn non_admin_cannot_touch_other_accounts() {
        let engine = engine();
        let alice = user(&engine, "alice@example.com").await;
        let bob = user(&engine, "bob@example.com").await;

        let patch = UserPatch {
            email: Some("stolen@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&alice, bob.user_id, patch).await,
            Err(AuthError::PermissionDenied(_))
        ));
        assert!(matches!(
            engine.get_user(&alice, bob.user_id).await,
            Err(AuthError::PermissionDenied(_))
        ));
        assert!(matches!(engine.list_users(&alice).await, Err(AuthError::PermissionDenied(_))));
        assert!(matches!(
            engine.delete_user(&alice, bob.user_id).await,
            Err(AuthError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn malformed_patch_for_another_account_is_denied_before_validation() {
        let engine = engine();
        let alice = user(&engine, "alice@example.com").await;
        let bob = user(&engine, "bob@example.com").await;

        let patch = UserPatch {
            email: Some("not-an-email".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&alice, bob.user_id, patch.clone()).await,
            Err(AuthError::PermissionDenied(_))
        ));
        assert!(matches!(
            engine.update_user(&alice, alice.user_id, patch).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn stale_admin_principal_loses_privileges_after_demotion() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let other = admin(&engine, "other@example.com").await;

        let demote = UserPatch {
            permission: Some(CoarsePermission::User),
            ..Default::default()
        };
        engine.update_user(&other, root.user_id, demote).await.unwrap();

        assert!(matches!(
            engine.create_role(&root, draft("Viewer", &[])).await,
            Err(AuthError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn assigning_missing_or_inactive_role_is_a_validation_error() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;

        let missing = UserPatch {
            role_id: Some(Some(RoleId::new())),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&root, alice.user_id, missing).await,
            Err(AuthError::Validation(_))
        ));

        let retired = RoleDraft::new("Retired", None, RoleStatus::Inactive, PageSet::from([Page::Users])).unwrap();
        let retired = engine.create_role(&root, retired).await.unwrap();
        let inactive = UserPatch {
            role_id: Some(Some(retired.role.id)),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_user(&root, alice.user_id, inactive).await,
            Err(AuthError::Validation(msg)) if msg.contains("inactive")
        ));

        let viewer = engine.create_role(&root, draft("Viewer", &[Page::Companies])).await.unwrap();
        let deactivate = RolePatch {
            status: Some(RoleStatus::Inactive),
            ..Default::default()
        };
        engine.update_role(&root, viewer.role.id, deactivate).await.unwrap();
        let invitation = Invitation {
            email: "carol@example.com".to_string(),
            password: PASSWORD.to_string(),
            permission: CoarsePermission::User,
            role_id: Some(viewer.role.id),
        };
        assert!(matches!(
            engine.invite_user(&root, invitation).await,
            Err(AuthError::Validation(msg)) if msg.contains("Viewer")
        ));
        assert!(engine.store().find_user_by_email("carol@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deactivated_role_keeps_authorizing_existing_members() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[Page::Companies])).await.unwrap();
        let alice = assign(&engine, &root, &alice, role.role.id).await;

        let deactivate = RolePatch {
            status: Some(RoleStatus::Inactive),
            ..Default::default()
        };
        let updated = engine.update_role(&root, role.role.id, deactivate).await.unwrap();
        assert_eq!(updated.role.status, RoleStatus::Inactive);
        assert_eq!(updated.pages, role.pages);

        assert!(engine.check_page_access(&alice, Page::Companies).await);
    }

    #[tokio::test]
    async fn invite_user_provisions_account_with_role() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[Page::Users])).await.unwrap();

        let invited = engine
            .invite_user(
                &root,
                Invitation {
                    email: "New@Example.com".to_string(),
                    password: PASSWORD.to_string(),
                    permission: CoarsePermission::User,
                    role_id: Some(role.role.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(invited.email, "new@example.com");
        assert_eq!(invited.role_id, Some(role.role.id));

        let signed_in = engine.sign_in("new@example.com", PASSWORD).await.unwrap();
        let principal = engine.verify_session(&signed_in.token).await.unwrap();
        assert!(engine.check_page_access(&principal, Page::Users).await);

        let again = Invitation {
            email: "new@example.com".to_string(),
            password: PASSWORD.to_string(),
            permission: CoarsePermission::User,
            role_id: None,
        };
        assert!(matches!(
            engine.invite_user(&root, again).await,
            Err(AuthError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn admin_cannot_delete_themselves() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;

        assert!(matches!(
            engine.delete_user(&root, root.user_id).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            engine.delete_user(&root, orgdesk_core::UserId::new()).await,
            Err(AuthError::NotFound)
        ));
    }

    // ---- role administration ----

    #[tokio::test]
    async fn role_names_must_be_unique() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        engine.create_role(&root, draft("Viewer", &[])).await.unwrap();
        let editor = engine.create_role(&root, draft("Editor", &[])).await.unwrap();

        assert!(matches!(
            engine.create_role(&root, draft("Viewer", &[Page::Help])).await,
            Err(AuthError::Conflict(_))
        ));

        let rename = RolePatch {
            name: Some(" Viewer ".to_string()),
            pages: Some(PageSet::from([Page::Settings])),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_role(&root, editor.role.id, rename).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(engine.get_role(editor.role.id).await.unwrap().pages.is_empty());
    }

    #[tokio::test]
    async fn role_mutations_require_admin() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[])).await.unwrap();

        assert!(matches!(
            engine.create_role(&alice, draft("Mine", &[Page::Settings])).await,
            Err(AuthError::PermissionDenied(_))
        ));
        assert!(matches!(
            engine.update_role(&alice, role.role.id, RolePatch::default()).await,
            Err(AuthError::PermissionDenied(_))
        ));
        assert!(matches!(
            engine.delete_role(&alice, role.role.id).await,
            Err(AuthError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn restrict_policy_refuses_deleting_assigned_role() {
        let engine = engine();
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[Page::Companies])).await.unwrap();
        assign(&engine, &root, &alice, role.role.id).await;

        assert!(matches!(
            engine.delete_role(&root, role.role.id).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(engine.get_role(role.role.id).await.is_ok());

        let unassign = UserPatch {
            role_id: Some(None),
            ..Default::default()
        };
        engine.update_user(&root, alice.user_id, unassign).await.unwrap();
        engine.delete_role(&root, role.role.id).await.unwrap();
        assert!(matches!(engine.get_role(role.role.id).await, Err(AuthError::NotFound)));
        assert!(matches!(
            engine.delete_role(&root, role.role.id).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn detach_policy_clears_assignments_with_the_delete() {
        let engine = engine_with_policy(RoleDeletePolicy::Detach);
        let root = admin(&engine, "root@example.com").await;
        let alice = user(&engine, "alice@example.com").await;
        let role = engine.create_role(&root, draft("Viewer", &[Page::Companies])).await.unwrap();
        let alice = assign(&engine, &root, &alice, role.role.id).await;

        engine.delete_role(&root, role.role.id).await.unwrap();

        let current = engine.get_user(&alice, alice.user_id).await.unwrap();
        assert_eq!(current.role_id, None);
        assert!(!engine.check_page_access(&alice, Page::Companies).await);
        assert!(engine.list_roles().await.unwrap().is_empty());
    }
}
