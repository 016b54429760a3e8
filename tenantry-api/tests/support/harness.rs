use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    routing::get,
    Json, Router,
};
use tenantry_api::{
    generate_service_account_token, protect, ApiConfig, ApiResult, AuthExtractor, FixedClock,
    InMemoryCredentialLookup, SigningSecret, OutboundRequest, OutboundResponse, ResourceAllowList,
    ServiceAccountClaims, ServiceAccountRecord, TenantAuthState, TenantServices, Transport,
};
use tenantry_api::telemetry::metrics_handler;
use tenantry_core::{LabelSelector, ObjectMeta, StoredObject, TenancyResult, TenantIdentity};
use tenantry_storage::{InMemoryObjectStore, ObjectStore, SharedCache};
use tenantry_test_utils::fixtures::configmaps;
use tower::ServiceExt;

/// 2024-01-01T00:00:00Z
pub const NOW: i64 = 1_704_067_200;

struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, _request: OutboundRequest) -> TenancyResult<OutboundResponse> {
        Ok(OutboundResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        })
    }
}

pub struct Harness {
    pub app: Router,
    pub state: TenantAuthState,
    pub lookup: Arc<InMemoryCredentialLookup>,
}

async fn list_configmaps(
    State(services): State<TenantServices>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<Vec<String>>> {
    let scoped = services.for_scope(&auth.scope);
    let mut names: Vec<String> = scoped
        .lister()
        .list(&LabelSelector::everything())?
        .iter()
        .map(|o| format!("{}/{}", o.namespace().unwrap_or_default(), o.name()))
        .collect();
    names.sort();
    Ok(Json(names))
}

async fn get_configmap(
    State(services): State<TenantServices>,
    AuthExtractor(auth): AuthExtractor,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<StoredObject>> {
    let scoped = services.for_scope(&auth.scope);
    let obj = scoped.lister().get(&namespace, &name)?;
    Ok(Json((*obj).clone()))
}

async fn create_configmap(
    State(services): State<TenantServices>,
    AuthExtractor(auth): AuthExtractor,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<StoredObject>> {
    let scoped = services.for_scope(&auth.scope);
    let obj = StoredObject::new(configmaps(), ObjectMeta::new(name).with_namespace(namespace));
    Ok(Json(scoped.writer().create(obj).await?))
}

async fn list_nodes() -> &'static str {
    "nodes"
}

pub fn harness() -> TenancyResult<Harness> {
    let mut config = ApiConfig::default();
    config.auth.signing_secret = SigningSecret::new("integration_secret".to_string())?;
    config.auth.clock = Arc::new(FixedClock(NOW));
    config.auth.trust_certificate_header = true;
    config.allow_list = ResourceAllowList::default().allow("", "configmaps");

    let cache = SharedCache::new();
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::with_watch(cache.clone()));
    let services =
        TenantServices::bootstrap(&config, cache, store, configmaps(), Arc::new(NullTransport))?;

    let lookup = Arc::new(InMemoryCredentialLookup::new());
    let state = TenantAuthState::new(config, lookup.clone());

    let routes = Router::new()
        .route("/api/v1/configmaps", get(list_configmaps))
        .route(
            "/api/v1/namespaces/:ns/configmaps/:name",
            get(get_configmap).post(create_configmap),
        )
        .route("/api/v1/nodes", get(list_nodes))
        .with_state(services);

    Ok(Harness {
        app: Router::new()
            .route("/metrics", get(metrics_handler))
            .merge(protect(routes, state.clone())),
        state,
        lookup,
    })
}

impl Harness {
    /// Register a service account for `tenant` and mint a token for it.
    pub fn token_for(&self, tenant: &TenantIdentity, namespace: &str, name: &str) -> Result<String, String> {
        let uid = format!("{}-{}-uid", tenant.tenant(), name);
        let secret = format!("{}-token", name);
        self.lookup.put_service_account(
            Some(tenant),
            namespace,
            name,
            ServiceAccountRecord {
                uid: uid.clone(),
                secrets: vec![secret.clone()],
            },
        );
        let claims = ServiceAccountClaims::new(
            namespace,
            name,
            &uid,
            &secret,
            Some(tenant),
            3600,
            &*self.state.config.auth.clock,
        );
        generate_service_account_token(&self.state.config.auth, &claims).map_err(|e| e.to_string())
    }

    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, String), String> {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

pub fn bearer(method: &str, uri: &str, token: &str) -> Result<Request<Body>, String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .map_err(|e| e.to_string())
}
