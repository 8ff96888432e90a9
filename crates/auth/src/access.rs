use std::collections::HashMap;

use sog_contracts::canonical;
use sog_contracts::{SecurityMeta, ServiceObject};

use crate::pdp::{DecisionInput, PdpError, PolicyDecisionPoint};
use crate::Principal;

// Selects how retrieval authorizes: one coarse decision on the target SO, or
// a per-item pass over each candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStrategy {
    CoarseOnly,
    PerItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoOperation {
    Read,
    Write,
    Delete,
    Subscribe,
    Actuate,
}

impl SoOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SoOperation::Read => "read",
            SoOperation::Write => "write",
            SoOperation::Delete => "delete",
            SoOperation::Subscribe => "subscribe",
            SoOperation::Actuate => "actuate",
        }
    }
}

#[derive(Debug)]
pub enum AccessError {
    Denied,
    Pdp(PdpError),
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::Denied => write!(f, "operation denied for principal"),
            AccessError::Pdp(err) => write!(f, "policy evaluation failed: {}", err),
        }
    }
}

impl std::error::Error for AccessError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDecision {
    pub allowed: bool,
    pub acting_user_id: String,
}

// Memoizes per-item decisions for one request. Created at the top of a
// retrieval handler, threaded by `&mut`, dropped with the response; never
// shared across requests or principals.
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: HashMap<String, ItemDecision>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Coarse per-(SO, operation) decision. The owner is always allowed; beyond
// that the SO's security descriptor decides, consulting the PDP only for
// PolicyRef descriptors.
pub async fn authorize_so(
    pdp: &dyn PolicyDecisionPoint,
    principal: &Principal,
    so: &ServiceObject,
    operation: SoOperation,
) -> Result<(), AccessError> {
    if so.owner_id == principal.id {
        return Ok(());
    }

    match &so.security {
        SecurityMeta::Public => Ok(()),
        SecurityMeta::OwnerOnly => Err(AccessError::Denied),
        SecurityMeta::PolicyRef { policy } => {
            let decision = pdp
                .decide(&DecisionInput {
                    principal_id: &principal.id,
                    target: &so.id,
                    operation: operation.as_str(),
                    policy,
                })
                .await
                .map_err(AccessError::Pdp)?;

            if decision.allow {
                Ok(())
            } else {
                Err(AccessError::Denied)
            }
        }
    }
}

// Fine per-item decision during a listing. Identical (owner, metadata) pairs
// hit the cache and never reach the PDP twice within one request.
pub async fn authorize_item(
    pdp: &dyn PolicyDecisionPoint,
    principal: &Principal,
    item_owner: &str,
    item_id: &str,
    security: &SecurityMeta,
    cache: &mut DecisionCache,
) -> Result<ItemDecision, PdpError> {
    let fingerprint = canonical::hash_canonical_json(&serde_json::json!({
        "owner": item_owner,
        "security": security,
    }));

    if let Some(decision) = cache.entries.get(&fingerprint) {
        return Ok(decision.clone());
    }

    let decision = match security {
        SecurityMeta::Public => ItemDecision {
            allowed: true,
            acting_user_id: principal.id.clone(),
        },
        SecurityMeta::OwnerOnly => ItemDecision {
            allowed: principal.id == item_owner,
            acting_user_id: principal.id.clone(),
        },
        SecurityMeta::PolicyRef { policy } => {
            let evaluated = pdp
                .decide(&DecisionInput {
                    principal_id: &principal.id,
                    target: item_id,
                    operation: "read_item",
                    policy,
                })
                .await?;

            ItemDecision {
                allowed: evaluated.allow,
                acting_user_id: evaluated
                    .acting_user_id
                    .unwrap_or_else(|| principal.id.clone()),
            }
        }
    };

    cache.entries.insert(fingerprint, decision.clone());
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sog_contracts::ActuationSpec;

    use super::*;
    use crate::pdp::PdpDecision;

    struct CountingPdp {
        allow: bool,
        calls: AtomicUsize,
    }

    impl CountingPdp {
        fn new(allow: bool) -> Self {
            Self {
                allow,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PolicyDecisionPoint for CountingPdp {
        async fn decide(&self, _input: &DecisionInput<'_>) -> Result<PdpDecision, PdpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PdpDecision {
                allow: self.allow,
                acting_user_id: None,
                reason: None,
            })
        }
    }

    fn so(owner: &str, security: SecurityMeta) -> ServiceObject {
        ServiceObject {
            id: "so-1".to_string(),
            owner_id: owner.to_string(),
            name: None,
            description: None,
            streams: BTreeMap::new(),
            actuations: vec![ActuationSpec {
                name: "reset".to_string(),
                description: None,
            }],
            security,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn principal(id: &str) -> Principal {
        Principal { id: id.to_string() }
    }

    #[tokio::test]
    async fn owner_is_always_allowed_without_policy_evaluation() {
        let pdp = CountingPdp::new(false);
        let object = so(
            "alice",
            SecurityMeta::PolicyRef {
                policy: "tok".to_string(),
            },
        );

        authorize_so(&pdp, &principal("alice"), &object, SoOperation::Delete)
            .await
            .expect("owner must be allowed");
        assert_eq!(pdp.calls(), 0);
    }

    #[tokio::test]
    async fn public_objects_allow_strangers() {
        let pdp = CountingPdp::new(false);
        let object = so("alice", SecurityMeta::Public);

        authorize_so(&pdp, &principal("bob"), &object, SoOperation::Read)
            .await
            .expect("public object must be readable");
        assert_eq!(pdp.calls(), 0);
    }

    #[tokio::test]
    async fn owner_only_objects_deny_strangers() {
        let pdp = CountingPdp::new(true);
        let object = so("alice", SecurityMeta::OwnerOnly);

        let err = authorize_so(&pdp, &principal("bob"), &object, SoOperation::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied));
        assert_eq!(pdp.calls(), 0);
    }

    #[tokio::test]
    async fn policy_ref_objects_consult_the_pdp() {
        let pdp = CountingPdp::new(false);
        let object = so(
            "alice",
            SecurityMeta::PolicyRef {
                policy: "tok".to_string(),
            },
        );

        let err = authorize_so(&pdp, &principal("bob"), &object, SoOperation::Write)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied));
        assert_eq!(pdp.calls(), 1);
    }

    #[tokio::test]
    async fn identical_metadata_is_evaluated_once_per_request() {
        let pdp = CountingPdp::new(true);
        let caller = principal("bob");
        let mut cache = DecisionCache::new();
        let security = SecurityMeta::PolicyRef {
            policy: "tok".to_string(),
        };

        let first = authorize_item(&pdp, &caller, "alice", "item-1", &security, &mut cache)
            .await
            .expect("first evaluation");
        let second = authorize_item(&pdp, &caller, "alice", "item-2", &security, &mut cache)
            .await
            .expect("second evaluation");

        assert!(first.allowed);
        assert_eq!(first, second);
        assert_eq!(pdp.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_metadata_requires_fresh_evaluation() {
        let pdp = CountingPdp::new(true);
        let caller = principal("bob");
        let mut cache = DecisionCache::new();

        authorize_item(
            &pdp,
            &caller,
            "alice",
            "item-1",
            &SecurityMeta::PolicyRef {
                policy: "tok-a".to_string(),
            },
            &mut cache,
        )
        .await
        .expect("first policy evaluation");
        authorize_item(
            &pdp,
            &caller,
            "alice",
            "item-2",
            &SecurityMeta::PolicyRef {
                policy: "tok-b".to_string(),
            },
            &mut cache,
        )
        .await
        .expect("second policy evaluation");

        assert_eq!(pdp.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn owner_only_items_allow_only_the_source_owner() {
        let pdp = CountingPdp::new(false);
        let mut cache = DecisionCache::new();

        let denied = authorize_item(
            &pdp,
            &principal("bob"),
            "alice",
            "item-1",
            &SecurityMeta::OwnerOnly,
            &mut cache,
        )
        .await
        .expect("evaluation should not error");
        assert!(!denied.allowed);

        let mut cache = DecisionCache::new();
        let allowed = authorize_item(
            &pdp,
            &principal("alice"),
            "alice",
            "item-1",
            &SecurityMeta::OwnerOnly,
            &mut cache,
        )
        .await
        .expect("evaluation should not error");
        assert!(allowed.allowed);
        assert_eq!(pdp.calls(), 0);
    }
}
