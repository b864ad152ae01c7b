use std::sync::Arc;

use serde::Deserialize;
use tracing::error;
use warp::Filter;
use warp::http::StatusCode;

use crate::auth::TokenService;
use crate::registry::Registry;
use hat_persistence::repositories::{GameRepository, UserRepository};
use hat_types::{GameId, GameSettings, User, UserId};

pub mod auth;
pub mod config;
pub mod registry;
pub mod websocket;

/// Register, login and user-change all share the original's loose body
/// shape; absent fields default to empty strings.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "Username", default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StagesQuery {
    stages: Option<u32>,
}

pub fn create_routes(
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
    users: Arc<UserRepository>,
    games: Arc<GameRepository>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let registry_filter = warp::any().map({
        let registry = registry.clone();
        move || registry.clone()
    });

    let tokens_filter = warp::any().map({
        let tokens = tokens.clone();
        move || tokens.clone()
    });

    let users_filter = warp::any().map({
        let users = users.clone();
        move || users.clone()
    });

    let games_filter = warp::any().map({
        let games = games.clone();
        move || games.clone()
    });

    let register = warp::path!("api" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(users_filter.clone())
        .and_then(handle_register);

    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(warp::body::json())
        .and(users_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_login);

    let user_get = warp::path!("api" / "user")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(users_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_user_get);

    let user_change = warp::path!("api" / "user" / "change")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .and(users_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_user_change);

    let user_show = warp::path!("api" / "user" / "id" / UserId)
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .and(users_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_user_show);

    let game_show = warp::path!("api" / "game" / "id" / GameId)
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(registry_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_game_show);

    let stat = warp::path!("api" / "stat")
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .and(games_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_stat);

    let recommend = warp::path!("api" / "recommend")
        .and(warp::post())
        .and(warp::query::<RecommendQuery>())
        .and(warp::header::optional::<String>("authorization"))
        .and(games_filter.clone())
        .and(tokens_filter.clone())
        .and_then(handle_recommend);

    // WS upgrade to create a game; the optional `stages` query parameter
    // keeps the original path shape.
    let host = warp::path!("api" / "host" / String / usize / usize / u64)
        .map(|token, players, num_words, timer| (token, players, num_words, timer))
        .and(warp::query::<StagesQuery>())
        .and(warp::ws())
        .and(registry_filter.clone())
        .and(tokens_filter.clone())
        .and(users_filter.clone())
        .and_then(handle_host_upgrade);

    let join = warp::path!("api" / "join" / String / GameId)
        .and(warp::ws())
        .and(registry_filter.clone())
        .and(tokens_filter.clone())
        .and(users_filter.clone())
        .and_then(handle_join_upgrade);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "OPTIONS"]);

    register
        .or(login)
        .or(user_get)
        .or(user_change)
        .or(user_show)
        .or(game_show)
        .or(stat)
        .or(recommend)
        .or(host)
        .or(join)
        .with(cors)
        .with(warp::log("hatgame"))
}

type JsonReply = warp::reply::WithStatus<warp::reply::Json>;

fn reply_error(status: StatusCode, message: &str) -> JsonReply {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message })),
        status,
    )
}

fn valid_email(email: &str) -> bool {
    static EMAIL_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    EMAIL_RE
        .get_or_init(|| regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
        .is_match(email)
}

/// Pull the authenticated user id out of a bearer header, or produce the
/// 401 reply to send instead.
fn bearer_user_id(tokens: &TokenService, header: Option<&str>) -> Result<UserId, JsonReply> {
    let Some(header) = header else {
        return Err(reply_error(
            StatusCode::UNAUTHORIZED,
            "authentication required",
        ));
    };
    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    tokens
        .verify_token(token)
        .map_err(|error| reply_error(StatusCode::UNAUTHORIZED, &error.to_string()))
}

async fn handle_register(
    body: CredentialsRequest,
    users: Arc<UserRepository>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if !valid_email(&body.email) || body.password.trim().is_empty() {
        return Ok(reply_error(StatusCode::BAD_REQUEST, "bad user json"));
    }

    let hash = match auth::hash_password(&body.password) {
        Ok(hash) => hash,
        Err(_) => {
            return Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not encode password",
            ));
        }
    };

    match users.create_user(&body.email, &body.username, &hash).await {
        Ok(user) => Ok(warp::reply::with_status(
            warp::reply::json(&user),
            StatusCode::OK,
        )),
        Err(error) if error.is_conflict() => {
            Ok(reply_error(StatusCode::CONFLICT, &error.to_string()))
        }
        Err(error) => {
            error!(%error, "failed to register user");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ))
        }
    }
}

async fn handle_login(
    body: CredentialsRequest,
    users: Arc<UserRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let model = match users.find_by_email(&body.email).await {
        Ok(Some(model)) => model,
        Ok(None) => {
            return Ok(reply_error(
                StatusCode::UNAUTHORIZED,
                "wrong email or password",
            ));
        }
        Err(error) => {
            error!(%error, "login lookup failed");
            return Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ));
        }
    };

    if !auth::verify_password(&body.password, &model.password_hash) {
        return Ok(reply_error(
            StatusCode::UNAUTHORIZED,
            "wrong email or password",
        ));
    }

    let token = match tokens.create_token(model.id) {
        Ok(token) => token,
        Err(error) => {
            error!(%error, "token creation failed");
            return Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not create authentication token",
            ));
        }
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "sessionToken": token,
            "user": UserRepository::model_to_user(&model),
        })),
        StatusCode::OK,
    ))
}

async fn handle_user_get(
    header: Option<String>,
    users: Arc<UserRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = match bearer_user_id(&tokens, header.as_deref()) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };

    match users.find_by_id(id).await {
        Ok(Some(model)) => {
            let token = header
                .as_deref()
                .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).to_string())
                .unwrap_or_default();
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "sessionToken": token,
                    "user": UserRepository::model_to_user(&model),
                })),
                StatusCode::OK,
            ))
        }
        Ok(None) => Ok(reply_error(StatusCode::NOT_FOUND, "user not found")),
        Err(error) => {
            error!(%error, "user fetch failed");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not fetch from database",
            ))
        }
    }
}

async fn handle_user_change(
    header: Option<String>,
    body: CredentialsRequest,
    users: Arc<UserRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = match bearer_user_id(&tokens, header.as_deref()) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };

    let password = body.password.trim();
    let hash = if password.is_empty() {
        None
    } else {
        match auth::hash_password(password) {
            Ok(hash) => Some(hash),
            Err(_) => {
                return Ok(reply_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "could not encrypt password",
                ));
            }
        }
    };

    match users.update_user(id, &body.username, hash.as_deref()).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({})),
            StatusCode::OK,
        )),
        Err(error) => {
            error!(%error, "user update failed");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ))
        }
    }
}

async fn handle_user_show(
    id: UserId,
    header: Option<String>,
    users: Arc<UserRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if let Err(reply) = bearer_user_id(&tokens, header.as_deref()) {
        return Ok(reply);
    }

    match users.find_by_id(id).await {
        Ok(Some(model)) => Ok(warp::reply::with_status(
            warp::reply::json(&UserRepository::model_to_user(&model)),
            StatusCode::OK,
        )),
        Ok(None) => Ok(reply_error(
            StatusCode::NOT_FOUND,
            &format!("no user with id {id}"),
        )),
        Err(error) => {
            error!(%error, "user fetch failed");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ))
        }
    }
}

async fn handle_game_show(
    id: GameId,
    header: Option<String>,
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if let Err(reply) = bearer_user_id(&tokens, header.as_deref()) {
        return Ok(reply);
    }

    match registry.snapshot(id).await {
        Some(snapshot) => Ok(warp::reply::with_status(
            warp::reply::json(&snapshot),
            StatusCode::OK,
        )),
        None => Ok(reply_error(
            StatusCode::NOT_FOUND,
            &format!("no game with id {id}"),
        )),
    }
}

async fn handle_stat(
    header: Option<String>,
    games: Arc<GameRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = match bearer_user_id(&tokens, header.as_deref()) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };

    match games.user_statistics(id).await {
        Ok(stats) => Ok(warp::reply::with_status(
            warp::reply::json(&stats),
            StatusCode::OK,
        )),
        Err(error) => {
            error!(%error, "statistics query failed");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ))
        }
    }
}

async fn handle_recommend(
    query: RecommendQuery,
    header: Option<String>,
    games: Arc<GameRepository>,
    tokens: Arc<TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = match bearer_user_id(&tokens, header.as_deref()) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };

    let Some(n) = query.n else {
        return Ok(reply_error(
            StatusCode::BAD_REQUEST,
            "missing required query param \"n\"",
        ));
    };

    match games.recommend_words(id, n).await {
        Ok(words) => Ok(warp::reply::with_status(
            warp::reply::json(&words),
            StatusCode::OK,
        )),
        Err(error) => {
            error!(%error, "recommendation query failed");
            Ok(reply_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ))
        }
    }
}

/// Resolve a WS-upgrade token to a full user record. Failures turn into a
/// plain rejection: the upgrade never happens and the client sees no
/// protocol-level response.
async fn authorize_ws(
    tokens: &TokenService,
    users: &UserRepository,
    token: &str,
) -> Result<User, warp::Rejection> {
    let id = tokens
        .verify_token(token)
        .map_err(|_| warp::reject::not_found())?;
    let model = users
        .find_by_id(id)
        .await
        .map_err(|_| warp::reject::not_found())?
        .ok_or_else(warp::reject::not_found)?;
    Ok(UserRepository::model_to_user(&model))
}

async fn handle_host_upgrade(
    params: (String, usize, usize, u64),
    query: StagesQuery,
    ws: warp::ws::Ws,
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
    users: Arc<UserRepository>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let (token, num_players, num_words, turn_seconds) = params;
    let user = authorize_ws(&tokens, &users, &token).await?;

    let settings = GameSettings {
        num_players,
        num_words,
        num_stages: query.stages.unwrap_or(1),
        turn_seconds,
    };
    if let Err(reason) = settings.validate() {
        tracing::warn!(player = user.id, reason, "rejected host request");
        return Err(warp::reject::not_found());
    }

    Ok(ws.on_upgrade(move |socket| websocket::run_host(socket, registry, user, settings)))
}

async fn handle_join_upgrade(
    token: String,
    game_id: GameId,
    ws: warp::ws::Ws,
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
    users: Arc<UserRepository>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user = authorize_ws(&tokens, &users, &token).await?;
    Ok(ws.on_upgrade(move |socket| websocket::run_join(socket, registry, game_id, user)))
}
