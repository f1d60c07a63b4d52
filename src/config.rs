use secrecy::SecretString;
use std::env;

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Extra CORS origins, e.g. LAN addresses during development.
    pub cors_extra_origins: Vec<String>,

    /// Shared HS256 secret of the hosted auth provider.
    pub jwt_secret: SecretString,

    pub stripe_webhook_secret: SecretString,

    pub resend_api_url: String,
    pub resend_api_key: SecretString,
    pub email_from: String,

    pub auth_admin_url: String,
    pub auth_service_role_key: SecretString,

    // Entitlements
    pub free_generations_per_month: i64,

    // Password reset
    pub reset_code_ttl_secs: i64,
    pub reset_code_max_attempts: i32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
            cors_extra_origins: env::var("CORS_EXTRA_ORIGINS")
                .map(|extra| {
                    extra
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set")
                .into(),

            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .unwrap_or_default()
                .into(),

            resend_api_url: env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".into()),
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default().into(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "InvoiceAI <no-reply@invoiceai.app>".into()),

            auth_admin_url: env::var("AUTH_ADMIN_URL")
                .unwrap_or_else(|_| "http://localhost:54321/auth/v1".into()),
            auth_service_role_key: env::var("AUTH_SERVICE_ROLE_KEY")
                .unwrap_or_default()
                .into(),

            free_generations_per_month: env::var("FREE_GENERATIONS_PER_MONTH")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),

            reset_code_ttl_secs: env::var("RESET_CODE_TTL_SECS")
                .unwrap_or_else(|_| "1800".into()) // 30 minutes
                .parse()
                .unwrap_or(1800),
            reset_code_max_attempts: env::var("RESET_CODE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/invoiceai_test".into(),
            database_max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:5173".into(),
            cors_extra_origins: Vec::new(),
            jwt_secret: "test-jwt-secret".to_string().into(),
            stripe_webhook_secret: "whsec_test".to_string().into(),
            resend_api_url: "http://127.0.0.1:9".into(),
            resend_api_key: "re_test".to_string().into(),
            email_from: "InvoiceAI <test@invoiceai.app>".into(),
            auth_admin_url: "http://127.0.0.1:9/auth/v1".into(),
            auth_service_role_key: "service-role".to_string().into(),
            free_generations_per_month: 5,
            reset_code_ttl_secs: 1800,
            reset_code_max_attempts: 5,
        }
    }
}
