// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Unit tests for `customdomain.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{DNS_RECORD_TYPE_A, DNS_RECORD_TYPE_CNAME, REQUEUE_IMMEDIATELY};
    use crate::crd::{
        CustomDomain, CustomDomainRegistration, CustomDomainRegistrationStatus, CustomDomainSpec,
    };
    use crate::labels::{CUSTOM_DOMAIN_UID_ANNOTATION, FINALIZER_DOMAIN};
    use crate::providers::loadbalancer::{PROVIDER_CNAME, PROVIDER_STATIC_IP};
    use crate::reconcilers::customdomain::arbitrate;
    use crate::reconcilers::finalizers::has_finalizer;
    use crate::reconcilers::references::object_reference;
    use crate::reconcilers::status::{create_condition, find_condition};
    use crate::status_reasons::{
        CONDITION_TYPE_LOAD_BALANCER_PROVISIONED, CONDITION_TYPE_VERIFIED, REASON_DOMAIN_VERIFIED,
        REASON_PROVIDER_ERROR, REASON_PROVISIONED, REASON_RELEASING, STATUS_FALSE, STATUS_TRUE,
        STATUS_UNKNOWN,
    };
    use crate::store::DomainStore;
    use crate::testing::{registration, TestEnv};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::jiff::Timestamp;
    use kube::runtime::controller::Action;
    use kube::ResourceExt;
    use std::time::Duration;

    /// Create a registration and run it until it has created its domain.
    async fn claim(env: &TestEnv, namespace: &str, domain: &str) -> CustomDomainRegistration {
        env.store.insert_registration(registration(namespace, domain));
        env.reconcile_registration(namespace, domain).await.unwrap();
        env.reconcile_registration(namespace, domain).await.unwrap();
        env.store.registration(namespace, domain).unwrap()
    }

    fn with_verified(namespace: &str, verified: bool) -> CustomDomainRegistration {
        let mut reg = registration(namespace, "my-app.test");
        let status = if verified { STATUS_TRUE } else { STATUS_FALSE };
        reg.status = Some(CustomDomainRegistrationStatus {
            conditions: vec![create_condition(
                CONDITION_TYPE_VERIFIED,
                status,
                REASON_DOMAIN_VERIFIED,
                "",
            )],
            ..Default::default()
        });
        reg
    }

    // ========== Tests for arbitrate ==========

    #[test]
    fn test_arbitrate_picks_first_verified_in_list_order() {
        let regs = vec![
            with_verified("app1", false),
            with_verified("app2", true),
            with_verified("app3", true),
        ];
        assert_eq!(arbitrate(None, &regs).as_deref(), Some("app2"));
    }

    #[test]
    fn test_arbitrate_without_verified_registration() {
        let regs = vec![with_verified("app1", false), with_verified("app2", false)];
        assert_eq!(arbitrate(None, &regs), None);
        assert_eq!(arbitrate(None, &[]), None);
    }

    #[test]
    fn test_arbitrate_owner_is_sticky() {
        // app1 comes first and is verified, but app2 already owns the domain
        let regs = vec![with_verified("app1", true), with_verified("app2", true)];
        assert_eq!(arbitrate(Some("app2"), &regs).as_deref(), Some("app2"));
    }

    #[test]
    fn test_arbitrate_clears_unverified_owner_without_reelecting() {
        let regs = vec![with_verified("app1", true), with_verified("app2", false)];
        assert_eq!(arbitrate(Some("app2"), &regs), None);
    }

    #[test]
    fn test_arbitrate_clears_missing_owner() {
        let regs = vec![with_verified("app1", true)];
        assert_eq!(arbitrate(Some("app9"), &regs), None);
    }

    #[test]
    fn test_arbitrate_ignores_terminating_registrations() {
        let mut leaving = with_verified("app1", true);
        leaving.metadata.deletion_timestamp = Some(Time(Timestamp::now()));
        let regs = vec![leaving, with_verified("app2", true)];

        assert_eq!(arbitrate(Some("app1"), &regs), None);
        assert_eq!(arbitrate(None, &regs).as_deref(), Some("app2"));
    }

    // ========== Tests for reconcile_customdomain ==========

    #[tokio::test]
    async fn test_first_pass_only_adds_finalizer() {
        let env = TestEnv::new();
        claim(&env, "app1", "my-app.test").await;

        let action = env.reconcile_domain("my-app.test").await.unwrap();

        assert_eq!(action, Action::requeue(REQUEUE_IMMEDIATELY));
        let domain = env.store.domain("my-app.test").unwrap();
        assert!(has_finalizer(&domain, FINALIZER_DOMAIN));
        assert!(domain.status.is_none());
        assert_eq!(env.load_balancer.provisions(), 0);
    }

    #[tokio::test]
    async fn test_provisions_root_domain_with_static_ip() {
        let env = TestEnv::new();
        let reg = claim(&env, "app1", "my-app.test").await;

        env.reconcile_domain("my-app.test").await.unwrap();
        let action = env.reconcile_domain("my-app.test").await.unwrap();
        assert_eq!(action, Action::await_change());

        let domain = env.store.domain("my-app.test").unwrap();
        assert_eq!(
            domain.spec.load_balancer_provider.as_deref(),
            Some(PROVIDER_STATIC_IP)
        );
        let key = domain.spec.verification_key.as_deref().unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(domain.spec.owner_tenant, None);

        let status = domain.status.as_ref().unwrap();
        let endpoint = status.routing_endpoint.as_ref().unwrap();
        assert_eq!(endpoint.dns_records.len(), 1);
        assert_eq!(endpoint.dns_records[0].name, "my-app.test");
        assert_eq!(endpoint.dns_records[0].r#type, DNS_RECORD_TYPE_A);
        assert_eq!(endpoint.dns_records[0].value, "203.0.113.10");

        let lb = find_condition(&status.conditions, CONDITION_TYPE_LOAD_BALANCER_PROVISIONED)
            .unwrap();
        assert_eq!(lb.status, STATUS_TRUE);
        assert_eq!(lb.reason.as_deref(), Some(REASON_PROVISIONED));

        // the registration is marked as tracked by this domain
        let reg = env.store.registration("app1", &reg.name_any()).unwrap();
        assert_eq!(
            reg.annotations().get(CUSTOM_DOMAIN_UID_ANNOTATION),
            domain.uid().as_ref()
        );
    }

    #[tokio::test]
    async fn test_subdomain_uses_cname() {
        let env = TestEnv::new();
        claim(&env, "app2", "sub.my-app.test").await;

        env.reconcile_domain("sub.my-app.test").await.unwrap();
        env.reconcile_domain("sub.my-app.test").await.unwrap();

        let domain = env.store.domain("sub.my-app.test").unwrap();
        assert_eq!(
            domain.spec.load_balancer_provider.as_deref(),
            Some(PROVIDER_CNAME)
        );
        let endpoint = domain.status.unwrap().routing_endpoint.unwrap();
        assert_eq!(endpoint.dns_records[0].r#type, DNS_RECORD_TYPE_CNAME);
        assert_eq!(endpoint.dns_records[0].value, "edge.example.net");
    }

    #[tokio::test]
    async fn test_verification_key_is_generated_once() {
        let env = TestEnv::new();
        claim(&env, "app1", "my-app.test").await;
        env.reconcile_domain("my-app.test").await.unwrap();
        env.reconcile_domain("my-app.test").await.unwrap();
        let key = env.store.domain("my-app.test").unwrap().spec.verification_key;

        let writes = env.store.writes();
        env.reconcile_domain("my-app.test").await.unwrap();

        assert_eq!(env.store.domain("my-app.test").unwrap().spec.verification_key, key);
        assert_eq!(env.store.writes(), writes, "a converged domain is not rewritten");
    }

    #[tokio::test]
    async fn test_prunes_missing_and_replaced_registrations() {
        let env = TestEnv::new();
        let app1 = claim(&env, "app1", "my-app.test").await;
        let mut gone = registration("app2", "my-app.test");
        gone.metadata.uid = Some("uid-gone".to_string());
        let mut replaced = env.store.insert_registration(registration("app3", "my-app.test"));
        replaced.metadata.uid = Some("uid-previous-app3".to_string());

        let mut domain = env.store.domain("my-app.test").unwrap();
        domain.spec.registrations.push(object_reference(&gone));
        domain.spec.registrations.push(object_reference(&replaced));
        domain.spec.registrations.push(object_reference(&app1));
        env.store.update_domain_spec(&domain).await.unwrap();

        env.reconcile_domain("my-app.test").await.unwrap();
        env.reconcile_domain("my-app.test").await.unwrap();

        let domain = env.store.domain("my-app.test").unwrap();
        assert_eq!(domain.spec.registrations, vec![object_reference(&app1)]);
        let app3 = env.store.registration("app3", "my-app.test").unwrap();
        assert!(!app3.annotations().contains_key(CUSTOM_DOMAIN_UID_ANNOTATION));
    }

    #[tokio::test]
    async fn test_domain_without_registrations_is_deleted_and_released() {
        let env = TestEnv::new();
        let mut gone = registration("app1", "my-app.test");
        gone.metadata.uid = Some("uid-gone".to_string());
        env.store
            .create_domain(&CustomDomain::new(
                "my-app.test",
                CustomDomainSpec {
                    load_balancer_provider: Some(PROVIDER_STATIC_IP.to_string()),
                    registrations: vec![object_reference(&gone)],
                    ..CustomDomainSpec::default()
                },
            ))
            .await
            .unwrap();

        env.reconcile_domain("my-app.test").await.unwrap();
        let action = env.reconcile_domain("my-app.test").await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_IMMEDIATELY));

        let terminating = env.store.domain("my-app.test").unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());
        assert!(terminating.spec.registrations.is_empty());

        env.reconcile_domain("my-app.test").await.unwrap();
        assert!(env.store.domain("my-app.test").is_none());
        assert_eq!(env.load_balancer.releases(), 1);
    }

    #[tokio::test]
    async fn test_load_balancer_failure_is_reported_and_retried() {
        let env = TestEnv::new();
        claim(&env, "app1", "my-app.test").await;
        env.reconcile_domain("my-app.test").await.unwrap();
        env.load_balancer.set_fail(true);

        let err = env.reconcile_domain("my-app.test").await.unwrap_err();
        assert!(err.to_string().contains("failed to provision load balancer"));

        let domain = env.store.domain("my-app.test").unwrap();
        let status = domain.status.unwrap();
        assert!(status.routing_endpoint.is_none());
        let lb = find_condition(&status.conditions, CONDITION_TYPE_LOAD_BALANCER_PROVISIONED)
            .unwrap();
        assert_eq!(lb.status, STATUS_UNKNOWN);
        assert_eq!(lb.reason.as_deref(), Some(REASON_PROVIDER_ERROR));

        env.load_balancer.set_fail(false);
        env.reconcile_domain("my-app.test").await.unwrap();
        let status = env.store.domain("my-app.test").unwrap().status.unwrap();
        let lb = find_condition(&status.conditions, CONDITION_TYPE_LOAD_BALANCER_PROVISIONED)
            .unwrap();
        assert_eq!(lb.status, STATUS_TRUE);
        assert!(lb.message.is_none());
    }

    #[tokio::test]
    async fn test_pending_release_keeps_finalizer() {
        let env = TestEnv::new();
        claim(&env, "app1", "my-app.test").await;
        env.reconcile_domain("my-app.test").await.unwrap();
        env.reconcile_domain("my-app.test").await.unwrap();

        let domain = env.store.domain("my-app.test").unwrap();
        env.store.delete_domain(&domain).await.unwrap();
        env.load_balancer.set_pending_release(true);

        let action = env.reconcile_domain("my-app.test").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let domain = env.store.domain("my-app.test").unwrap();
        assert!(has_finalizer(&domain, FINALIZER_DOMAIN));
        let lb = find_condition(
            &domain.status.as_ref().unwrap().conditions,
            CONDITION_TYPE_LOAD_BALANCER_PROVISIONED,
        )
        .unwrap();
        assert_eq!(lb.reason.as_deref(), Some(REASON_RELEASING));

        env.load_balancer.set_pending_release(false);
        let action = env.reconcile_domain("my-app.test").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(env.store.domain("my-app.test").is_none());
    }

    #[tokio::test]
    async fn test_delete_conflicts_when_registration_joins() {
        let env = TestEnv::new();
        let mut gone = registration("app1", "my-app.test");
        gone.metadata.uid = Some("uid-gone".to_string());
        let created = env
            .store
            .create_domain(&CustomDomain::new(
                "my-app.test",
                CustomDomainSpec {
                    registrations: vec![object_reference(&gone)],
                    ..CustomDomainSpec::default()
                },
            ))
            .await
            .unwrap();

        // a registration appends itself after the domain was read
        let mut joining = registration("app2", "my-app.test");
        joining.metadata.uid = Some("uid-joining".to_string());
        env.store.edit_domain("my-app.test", |d| {
            d.spec.registrations.push(object_reference(&joining));
        });
        let err = env.store.delete_domain(&created).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(env.store.domain("my-app.test").is_some());
    }
}
