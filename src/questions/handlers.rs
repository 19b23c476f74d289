use axum::http::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::require_login,
    db::StoreError,
    error::AppError,
    forms::{self, FormErrors},
    questions::repo_types::{
        Answer, AnswerRating, NewAnswer, NewAnswerRating, NewQuestion, Question, Vote,
    },
    views::{BeforeHook, Handler, Reply, RequestContext, RouteOptions, Utility, ViewDef},
};

/// Hook results handed to the handlers through `ctx.locals`.
#[derive(Clone)]
struct LatestQuestions(Vec<Question>);

#[derive(Clone)]
struct LoadedQuestion(Option<(Question, Vec<Answer>)>);

#[derive(Clone)]
struct LoadedAnswer(Option<Answer>);

pub fn view() -> ViewDef {
    let get_and_post = || RouteOptions::new().methods([Method::GET, Method::POST]);
    ViewDef::new("IndexView")
        .route_base("/")
        .utility(
            "load_answer",
            Utility::Before(BeforeHook::new(|ctx| Box::pin(load_answer(ctx)))),
        )
        .handler(
            Handler::new("get", |ctx| Box::pin(index(ctx)))
                .before(BeforeHook::new(|ctx| Box::pin(load_latest_questions(ctx)))),
        )
        .handler(
            Handler::new("show_question", |ctx| Box::pin(show_question(ctx)))
                .params(["id_"])
                .route("/question/<id_>", get_and_post())
                .before(BeforeHook::new(|ctx| Box::pin(load_question(ctx)))),
        )
        .handler(
            Handler::new("create_question", |ctx| Box::pin(create_question(ctx)))
                .route("/question/new", get_and_post())
                .before(require_login()),
        )
        .handler(
            Handler::new("rate_answer", |ctx| Box::pin(rate_answer(ctx)))
                .params(["id_"])
                .route("/answer/rate/<id_>", RouteOptions::new())
                .before(require_login())
                .before_named("load_answer"),
        )
}

/// Id from the path; an id that is not a number matches nothing.
fn id_param(ctx: &RequestContext) -> Result<Option<i64>, AppError> {
    Ok(ctx.param("id_")?.parse::<i64>().ok())
}

async fn load_latest_questions(ctx: &mut RequestContext) -> Result<Option<Reply>, AppError> {
    let questions = Question::latest(ctx.db.conn()).await?;
    debug!(count = questions.len(), "latest questions loaded");
    ctx.locals.insert(LatestQuestions(questions));
    Ok(None)
}

async fn load_question(ctx: &mut RequestContext) -> Result<Option<Reply>, AppError> {
    let mut loaded = None;
    if let Some(id) = id_param(ctx)? {
        let label = format!("question with id {id}");
        if let Some(question) = ctx.db.fetch_one_or_report(Question::by_id(id), &label).await? {
            let answers = Answer::for_question(ctx.db.conn(), question.id).await?;
            loaded = Some((question, answers));
        }
    }
    ctx.locals.insert(LoadedQuestion(loaded));
    Ok(None)
}

async fn load_answer(ctx: &mut RequestContext) -> Result<Option<Reply>, AppError> {
    let mut loaded = None;
    if let Some(id) = id_param(ctx)? {
        let label = format!("answer with id {id}");
        loaded = ctx.db.fetch_one_or_report(Answer::by_id(id), &label).await?;
    }
    ctx.locals.insert(LoadedAnswer(loaded));
    Ok(None)
}

#[instrument(skip_all)]
async fn index(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let questions = ctx
        .locals
        .remove::<LatestQuestions>()
        .map(|l| l.0)
        .unwrap_or_default();
    Ok(Reply::render("index.html", json!({ "questions": questions })))
}

#[instrument(skip_all, fields(method = %ctx.method, id = ?ctx.params.get("id_")))]
async fn show_question(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let loaded = ctx.locals.remove::<LoadedQuestion>().and_then(|l| l.0);
    let form = forms::answer_form();
    let mut errors = FormErrors::new();

    if let (Some((question, _)), Some(user)) = (&loaded, &ctx.current_user) {
        if ctx.is_post() {
            match form.validate(&ctx.form) {
                Ok(()) => {
                    let (user_id, question_id) = (user.id, question.id);
                    let new_answer = NewAnswer::new(form.value(&ctx.form, "content"));
                    let answer_id =
                        Answer::create(ctx.db.conn(), user_id, question_id, &new_answer).await?;
                    info!(answer_id, question_id, user_id, "answer posted");
                    let back = ctx.url_for(
                        "IndexView:show_question",
                        &[("id_", question_id.to_string())],
                    )?;
                    return Ok(Reply::redirect(back));
                }
                Err(invalid) => errors = invalid,
            }
        }
    }

    let (question, answers) = match loaded {
        Some((question, answers)) => (json!(question), answers),
        None => (Value::Null, Vec::new()),
    };
    let answers: Vec<Value> = answers
        .into_iter()
        .map(|answer| {
            let voted = ctx
                .current_user
                .as_ref()
                .is_some_and(|u| u.voted_for(answer.id));
            let mut value = json!(answer);
            if let Value::Object(map) = &mut value {
                map.insert("voted".into(), Value::Bool(voted));
            }
            value
        })
        .collect();

    Ok(Reply::render(
        "question.html",
        json!({
            "question": question,
            "answers": answers,
            "form": form.echo(&ctx.form),
            "errors": errors,
        }),
    ))
}

#[instrument(skip_all, fields(method = %ctx.method))]
async fn create_question(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let form = forms::question_form();
    let mut errors = FormErrors::new();

    if ctx.is_post() {
        match form.validate(&ctx.form) {
            Ok(()) => {
                let user_id = ctx.current_user.as_ref().map(|u| u.id).ok_or(AppError::Unauthorized)?;
                let new_question =
                    NewQuestion::new(form.value(&ctx.form, "title"), form.value(&ctx.form, "content"));
                let question_id = Question::create(ctx.db.conn(), user_id, &new_question).await?;
                info!(question_id, user_id, "question created");
                return Ok(Reply::redirect(ctx.url_for("IndexView:get", &[])?));
            }
            Err(invalid) => errors = invalid,
        }
    }

    Ok(Reply::render(
        "question_new.html",
        json!({ "form": form.echo(&ctx.form), "errors": errors }),
    ))
}

#[instrument(skip_all, fields(id = ?ctx.params.get("id_")))]
async fn rate_answer(ctx: &mut RequestContext) -> Result<Reply, AppError> {
    let Some(answer) = ctx.locals.remove::<LoadedAnswer>().and_then(|l| l.0) else {
        return Ok(Reply::redirect(ctx.url_for("IndexView:get", &[])?));
    };
    let user_id = ctx.current_user.as_ref().map(|u| u.id).ok_or(AppError::Unauthorized)?;
    let already_voted = ctx.current_user.as_ref().is_some_and(|u| u.voted_for(answer.id));
    let back = ctx.url_for(
        "IndexView:show_question",
        &[("id_", answer.question_id.to_string())],
    )?;

    if already_voted {
        info!(answer_id = answer.id, user_id, "repeat vote ignored");
        return Ok(Reply::redirect(back));
    }

    let vote = Vote::from_action(ctx.query.get("action").map(String::as_str));
    match AnswerRating::create(ctx.db.conn(), user_id, answer.id, &NewAnswerRating::new(vote)).await {
        Ok(rating) => {
            if let Some(user) = ctx.current_user.as_mut() {
                user.ratings.push(rating);
            }
            info!(answer_id = answer.id, user_id, rating = rating.rating, "vote recorded");
        }
        Err(StoreError::Conflict) => {
            warn!(answer_id = answer.id, user_id, "concurrent repeat vote ignored");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Reply::redirect(back))
}
