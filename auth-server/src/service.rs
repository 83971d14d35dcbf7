//! HTTP endpoints

use actix_web::http::StatusCode;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::web::{Data, Json, JsonConfig, ServiceConfig};
use actix_web::{HttpRequest, HttpResponse, ResponseError, get, post};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::error;


use crate::auth::{self, AuthService, ErrorKind, RegisterRequest};
use crate::model::users::{User, UserId};

impl ResponseError for auth::Error {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidCredentials | ErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self.kind() {
            ErrorKind::Internal => {
                error!(
                    err = self as &(dyn std::error::Error + 'static),
                    "Request failed"
                );
                "internal server error".to_owned()
            }
            _ => self.to_string(),
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse { error })
    }
}

/// Body of every failed request
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct Registered {
    message: &'static str,
    user_id: UserId,
}

#[derive(Derivative, Deserialize)]
#[derivative(Debug)]
struct LoginRequest {
    account: String,
    #[derivative(Debug = "ignore")]
    password: String,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Debug, Serialize)]
struct Issued {
    token: String,
    /// Token lifetime in seconds
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct Validated {
    user_id: UserId,
    user: User,
}

#[derive(Debug, Serialize)]
struct Health<'a> {
    status: &'static str,
    service: &'a str,
}

/// Name of the service reported by health checks
#[derive(Debug, Clone)]
struct AppName(String);

/// Registers a new user
#[post("/register")]
async fn register(
    auth: Data<AuthService>,
    req: Json<RegisterRequest>,
) -> Result<HttpResponse, auth::Error> {
    let user_id = auth.register(req.into_inner()).await?;

    Ok(HttpResponse::Ok().json(Registered {
        message: "user registered successfully",
        user_id,
    }))
}

/// Exchanges credentials for a session token
#[post("/login")]
async fn login(
    auth: Data<AuthService>,
    req: Json<LoginRequest>,
) -> Result<HttpResponse, auth::Error> {
    let token = auth.login(&req.account, &req.password).await?;

    Ok(HttpResponse::Ok().json(Issued {
        token,
        expires_in: auth.token_lifetime().num_seconds(),
    }))
}

/// Resolves the user owning the session token
#[post("/validate-token")]
async fn validate_token(
    auth: Data<AuthService>,
    req: Json<TokenRequest>,
) -> Result<HttpResponse, auth::Error> {
    let (user_id, user) = auth.validate_token(&req.token).await?;

    Ok(HttpResponse::Ok().json(Validated { user_id, user }))
}

/// Issues a new session token in place of a still valid one
#[post("/refresh-token")]
async fn refresh_token(
    auth: Data<AuthService>,
    req: Json<TokenRequest>,
) -> Result<HttpResponse, auth::Error> {
    let token = auth.refresh_token(&req.token).await?;

    Ok(HttpResponse::Ok().json(Issued {
        token,
        expires_in: auth.token_lifetime().num_seconds(),
    }))
}

#[get("/health")]
async fn health(app_name: Data<AppName>) -> HttpResponse {
    HttpResponse::Ok().json(Health {
        status: "ok",
        service: &app_name.0,
    })
}

/// Reports malformed request bodies the same way as other failures
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::build(err.status_code()).json(ErrorResponse {
        error: err.to_string(),
    });

    InternalError::from_response(err, response).into()
}

/// Returns configuration function for the ActixWeb services
pub fn configure(
    app_name: String,
    auth: AuthService,
) -> impl Fn(&mut ServiceConfig) + Clone {
    let auth = Data::new(auth);
    let app_name = Data::new(AppName(app_name));

    move |cfg: &mut ServiceConfig| {
        cfg.app_data(auth.clone())
            .app_data(app_name.clone())
            .app_data(JsonConfig::default().error_handler(json_error))
            .service(register)
            .service(login)
            .service(validate_token)
            .service(refresh_token)
            .service(health);
    }
}
