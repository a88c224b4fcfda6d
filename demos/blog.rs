//! A tiny blog on top of sawsij.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example blog -- demos/blog
//! ```
//!
//! Log in as `admin` / `admin` to write posts. `/json/posts` serves the same
//! list as JSON.

use std::process::ExitCode;

use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sawsij::security::decode_destination;
use sawsij::{
    App, AppScope, AppSetup, GUEST, HandlerResponse, HandlerResult, Method, Request,
    RequestScope, Role, RouteConfig, User,
};

const EDITOR: Role = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Author {
    username: String,
    role: Role,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    hash: String,
}

impl User for Author {
    fn test_password(&self, password: &str, _app: &AppScope<Self>) -> bool {
        !self.hash.is_empty() && self.hash == hash_password(password)
    }

    fn role(&self) -> Role {
        self.role
    }

    fn clear_password_hash(&mut self) {
        self.hash.clear();
    }
}

#[derive(Debug, Serialize)]
struct Post {
    id: i64,
    title: String,
    body: String,
}

fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

fn find_author(username: &str, app: &AppScope<Author>) -> Option<Author> {
    let conn = app.db.connection().ok()?;
    conn.query_row(
        "SELECT username, role, hash FROM authors WHERE username = ?1",
        params![username],
        |row| {
            Ok(Author {
                username: row.get(0)?,
                role: row.get(1)?,
                hash: row.get(2)?,
            })
        },
    )
    .ok()
}

fn prepare_schema(app: &AppScope<Author>) -> Result<(), Box<dyn std::error::Error>> {
    let conn = app.db.connection()?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS authors (username TEXT PRIMARY KEY, role INTEGER NOT NULL, hash TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS posts (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, body TEXT NOT NULL);",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO authors (username, role, hash) VALUES (?1, ?2, ?3)",
        params!["admin", EDITOR, hash_password("admin")],
    )?;
    Ok(())
}

fn list_posts(app: &AppScope<Author>) -> Result<Vec<Post>, Box<dyn std::error::Error + Send + Sync>> {
    let conn = app.db.connection()?;
    let mut stmt = conn.prepare("SELECT id, title, body FROM posts ORDER BY id DESC")?;
    let posts = stmt
        .query_map([], |row| {
            Ok(Post {
                id: row.get(0)?,
                title: row.get(1)?,
                body: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

fn index(_req: &Request, app: &AppScope<Author>, _scope: &mut RequestScope<Author>) -> HandlerResult {
    let mut res = HandlerResponse::new();
    res.set("posts", &list_posts(app)?)?;
    Ok(res)
}

fn login(req: &Request, app: &AppScope<Author>, scope: &mut RequestScope<Author>) -> HandlerResult {
    let mut res = HandlerResponse::new();
    if !matches!(req.method(), Method::Post) {
        res.set("dest", &scope.url_params.get("dest"))?;
        return Ok(res);
    }

    let username = req.form_value("username").unwrap_or_default();
    let password = req.form_value("password").unwrap_or_default();
    let Some(author) = app.authenticate(&username, &password) else {
        info!(username = %username, "login failed");
        res.set("failed", &true)?;
        return Ok(res);
    };

    info!(username = %author.username, "logged in");
    scope.login(author)?;
    let dest = scope
        .url_params
        .get("dest")
        .and_then(decode_destination)
        .unwrap_or_else(|| "/".to_owned());
    Ok(HandlerResponse::redirect(dest))
}

fn logout(_req: &Request, _app: &AppScope<Author>, scope: &mut RequestScope<Author>) -> HandlerResult {
    scope.logout();
    Ok(HandlerResponse::redirect("/"))
}

fn new_post(req: &Request, app: &AppScope<Author>, _scope: &mut RequestScope<Author>) -> HandlerResult {
    if !matches!(req.method(), Method::Post) {
        let mut res = HandlerResponse::new();
        res.set("title", "New post")?;
        return Ok(res);
    }
    let title = req.form_value("title").unwrap_or_default();
    let body = req.form_value("body").unwrap_or_default();
    app.db.connection()?.execute(
        "INSERT INTO posts (title, body) VALUES (?1, ?2)",
        params![title, body],
    )?;
    Ok(HandlerResponse::redirect("/"))
}

fn denied(_req: &Request, _app: &AppScope<Author>, _scope: &mut RequestScope<Author>) -> HandlerResult {
    let mut res = HandlerResponse::new();
    res.set("message", "You are not allowed to see that page.")?;
    Ok(res)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    // Empty base path: taken from the first command-line argument.
    let mut app = App::configure(AppSetup::new(find_author), "")?;
    prepare_schema(app.scope())?;

    let everyone = [GUEST, EDITOR];
    app.route(RouteConfig::new("/", &everyone, index));
    app.route(RouteConfig::new("/json/posts", &everyone, index));
    app.route(RouteConfig::new("/login", &everyone, login));
    app.route(RouteConfig::new("/logout", &[EDITOR], logout));
    app.route(RouteConfig::new("/posts/new", &[EDITOR], new_post));
    app.route(RouteConfig::new("/denied", &everyone, denied));

    app.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "blog stopped");
            ExitCode::FAILURE
        }
    }
}
