//! Minimal jimo application
//!
//! ```sh
//! APP_PORT=8080 cargo run -p jimo-core --example hello
//! curl localhost:8080/users/7
//! ```

use jimo_core::middleware::{auth, MemoryStore, RequireAuth};
use jimo_core::{App, Context, HttpError, Response, RouteOptions, StatusCode, ValidationErrors};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

/// email -> (user id, password hash)
#[derive(Clone)]
struct Users(Arc<HashMap<String, (i64, String)>>);

async fn show_user(ctx: Context) -> jimo_core::Result<Response> {
    let id: u64 = ctx
        .param("id")
        .parse()
        .map_err(|_| HttpError::not_found("User not found"))?;
    ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
}

async fn create_user(ctx: Context) -> jimo_core::Result<Response> {
    let user: NewUser = ctx.bind()?;

    let mut errors = ValidationErrors::new();
    if user.name.trim().is_empty() {
        errors.add("name", "required");
    }
    if !user.email.contains('@') {
        errors.add("email", "must be an email address");
    }
    errors.into_result()?;

    ctx.json(StatusCode::CREATED, &serde_json::json!({ "name": user.name, "email": user.email }))
}

fn main() -> jimo_core::Result<()> {
    let mut app = App::new()?;
    app.web(Arc::new(MemoryStore::new()));

    let demo = HashMap::from([(
        "demo@example.com".to_string(),
        (1, auth::hash_password("secret")?),
    )]);
    app.container().singleton(Users(Arc::new(demo)))?;
    let container = app.container().clone();

    app.get("/", |_ctx: Context| async { Ok(Response::text("Hello from jimo")) })?;

    app.group("/api", |api| {
        api.get_with("/users/{id}", show_user, RouteOptions::new().name("user.show"))?;
        api.post("/users", create_user)?;
        api.post("/login", move |ctx: Context| {
            let container = container.clone();
            async move {
                let creds: Credentials = ctx.bind()?;
                let users: Users = container.resolve()?;
                let id = users
                    .0
                    .get(&creds.email)
                    .filter(|(_, hash)| auth::check_password(&creds.password, hash))
                    .map(|(id, _)| *id)
                    .ok_or_else(|| HttpError::unauthorized("Invalid credentials"))?;
                auth::login(&ctx, id)?;
                Ok(Response::redirect("/account", false))
            }
        })
    })?;

    app.group("/account", |account| {
        account.use_middleware(RequireAuth);
        account.get("/", |ctx: Context| async move {
            let id = auth::user_id(&ctx).unwrap_or_default();
            Ok(Response::text(format!("signed in as user {}", id)))
        })
    })?;

    if let Some(url) = app.url("user.show", &[("id", "7")]) {
        println!("try: http://{}{}", app.config().server.addr(), url);
    }

    app.run()
}
