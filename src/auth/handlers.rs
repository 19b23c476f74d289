use axum::{extract::FromRef, http::Method};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        jwt::{clear_session, session_cookie, SessionKeys},
        repo_types::{NewUser, User},
    },
    db::StoreError,
    error::AppError,
    forms::{self, add_error, FormErrors, FORM_LEVEL},
    views::{BeforeHook, Handler, Reply, RequestContext, RouteOptions, ViewDef},
};

pub fn view() -> ViewDef {
    let get_and_post = || RouteOptions::new().methods([Method::GET, Method::POST]);
    ViewDef::new("UserView")
        .handler(
            Handler::new("registration", |ctx| Box::pin(registration(ctx)))
                .route("/register/", get_and_post()),
        )
        .handler(Handler::new("login", |ctx| Box::pin(login(ctx))).route("/login/", get_and_post()))
        .handler(Handler::new("logout", |ctx| Box::pin(logout(ctx))))
}

/// Sends anonymous visitors to the login page.
pub fn require_login() -> BeforeHook {
    BeforeHook::new(|ctx| Box::pin(redirect_anonymous(ctx)))
}

async fn redirect_anonymous(ctx: &mut RequestContext) -> Result<Option<Reply>, AppError> {
    if ctx.is_authenticated() {
        return Ok(None);
    }
    info!(handler = %ctx.handler(), "login required");
    Ok(Some(Reply::redirect(ctx.url_for("UserView:login", &[])?)))
}

fn render_registration(ctx: &RequestContext, form: &forms::Form, errors: &FormErrors) -> Reply {
    Reply::render(
        "register.html",
        json!({ "form": form.echo(&ctx.form), "errors": errors }),
    )
}

#[instrument(skip_all, fields(method = %ctx.method))]
async fn registration(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let form = forms::registration_form();
    if !ctx.is_post() {
        return Ok(render_registration(ctx, &form, &FormErrors::new()));
    }
    if let Err(errors) = form.validate(&ctx.form) {
        warn!(fields = ?errors.keys().collect::<Vec<_>>(), "registration form invalid");
        return Ok(render_registration(ctx, &form, &errors));
    }

    let username = form.value(&ctx.form, "username").to_string();
    let new_user = NewUser::new(username, form.value(&ctx.form, "password"))?;
    match User::create(ctx.db.conn(), &new_user).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, "user registered");
            Ok(Reply::redirect(ctx.url_for("IndexView:get", &[])?))
        }
        Err(StoreError::Conflict) => {
            warn!(username = %new_user.username, "username already taken");
            let mut errors = FormErrors::new();
            add_error(&mut errors, "username", "Username already taken");
            Ok(render_registration(ctx, &form, &errors))
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip_all, fields(method = %ctx.method))]
async fn login(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let form = forms::login_form();
    let mut errors = FormErrors::new();

    if ctx.is_post() {
        match form.validate(&ctx.form) {
            Ok(()) => {
                let username = form.value(&ctx.form, "username").to_string();
                let label = format!("user with username {username}");
                let user = ctx
                    .db
                    .fetch_one_or_report(User::by_username(&username), &label)
                    .await?;

                match user {
                    Some(user) if user.check_password(form.value(&ctx.form, "password")) => {
                        let token = SessionKeys::from_ref(&ctx.state).sign(user.id)?;
                        ctx.cookies = std::mem::take(&mut ctx.cookies).add(session_cookie(token));
                        info!(user_id = user.id, "user logged in");
                        return Ok(Reply::redirect(ctx.url_for("IndexView:get", &[])?));
                    }
                    _ => {
                        warn!(username = %username, "login rejected");
                        add_error(&mut errors, FORM_LEVEL, "Invalid username or password");
                    }
                }
            }
            Err(invalid) => errors = invalid,
        }
    }

    Ok(Reply::render(
        "login.html",
        json!({ "form": form.echo(&ctx.form), "errors": errors }),
    ))
}

#[instrument(skip_all)]
async fn logout(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    if let Some(user) = ctx.current_user.take() {
        info!(user_id = user.id, "user logged out");
    }
    ctx.cookies = clear_session(std::mem::take(&mut ctx.cookies));
    Ok(Reply::redirect(ctx.url_for("IndexView:get", &[])?))
}
