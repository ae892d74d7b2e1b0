use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub smtp: Option<SmtpConfig>,
    /// Secret used to sign bearer tokens.
    pub jwt_secret: String,
    /// Directory that receives ticket attachments, served under /uploads.
    pub uploads_dir: String,
    /// Frontend base URL embedded in password-reset links.
    pub app_url: String,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u32,
    pub database: String,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Seed credentials for the first Admin account; registration is Admin-only,
/// so a fresh database needs one account created out of band.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env_or("SMTP_PORT", "587").parse().unwrap_or(587),
            username: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASS").ok(),
            from: env_or("EMAIL_FROM", "noreply@helpdesk.local"),
        });

        let bootstrap_admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(BootstrapAdmin {
                username: env_or("ADMIN_USERNAME", "admin"),
                email,
                password,
            }),
            _ => None,
        };

        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", "3000").parse().unwrap_or(3000),
            },
            database: DatabaseConfig {
                username: env_or("DB_USER", "helpdesk"),
                password: env_or("DB_PASSWORD", ""),
                server: env_or("DB_HOST", "localhost"),
                port: env_or("DB_PORT", "5432").parse().unwrap_or(5432),
                database: env_or("DB_NAME", "helpdesk"),
            },
            smtp,
            jwt_secret: env_or("JWT_SECRET", "change-me-in-production"),
            uploads_dir: env_or("UPLOADS_DIR", "uploads"),
            app_url: env_or("APP_URL", "http://localhost:5173"),
            bootstrap_admin,
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.server,
            self.database.port,
            self.database.database
        )
    }
}
