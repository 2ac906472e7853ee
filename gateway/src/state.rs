use crate::admission::AdmissionLimiter;
use crate::audit::AuditRecorder;
use crate::auth::AuthClient;
use crate::backend::BackendEndpoints;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::invoker::FunctionInvoker;
use crate::registry::ClientRegistry;
use resolver::Resolver;
use resolver::project_service::ProjectService;
use std::sync::Arc;

/// Everything the handlers share. Cloning is cheap; all fields are handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub endpoints: BackendEndpoints,
    pub resolver: Arc<Resolver>,
    pub registry: Arc<ClientRegistry>,
    pub auth: Arc<AuthClient>,
    pub invoker: FunctionInvoker,
    pub cache: Arc<ResultCache>,
    pub audit: AuditRecorder,
    pub limiter: AdmissionLimiter,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let endpoints = BackendEndpoints::from_config(&config);

        let resolver = Resolver::new(
            ProjectService::new(config.project_service_url.to_string(), config.auth_timeout),
            config.binding_cache_ttl,
        );

        let auth = AuthClient::new(config.auth_service_url.clone(), config.auth_timeout);
        let invoker = FunctionInvoker::new(&config);
        let cache = ResultCache::new(config.result_cache_ttl);
        let audit = AuditRecorder::new(config.audit_queue_size);
        let limiter = AdmissionLimiter::new(config.admission_limit);

        AppState {
            config: Arc::new(config),
            endpoints,
            resolver: Arc::new(resolver),
            registry: Arc::new(ClientRegistry::new()),
            auth: Arc::new(auth),
            invoker,
            cache: Arc::new(cache),
            audit,
            limiter,
        }
    }
}
