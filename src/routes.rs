use actix_files::NamedFile;
use actix_identity::Identity;
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_session::Session;
use actix_web::{
    get, post,
    web::{self, Data},
    HttpMessage, HttpRequest, HttpResponse, Responder,
};
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::{
    db::{self, NewLoan, PaymentOutcome},
    errors::AppError,
    structs::{Borrower, Device},
    utils, AppState, TEMPLATES,
};

fn render(template: &str, context: &Context) -> Result<HttpResponse, AppError> {
    let rendered = TEMPLATES.render(template, context).map_err(|e| {
        log::error!("Failed to render template: {}", e);
        AppError::TemplateError(e)
    })?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(rendered))
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location))
        .finish()
}

/// The single auth gate: every protected route redirects to the login
/// page when no identity is attached to the request.
fn auth_email(identity: &Option<Identity>) -> Option<String> {
    identity.as_ref().and_then(|id| id.id().ok())
}

#[get("/")]
pub async fn index_handler() -> impl Responder {
    see_other("/login")
}

#[get("/favicon")]
pub async fn favicon_handler() -> Result<impl Responder, AppError> {
    Ok(NamedFile::open("static/favicon.ico")?)
}

// ---------------------------------------------------------------------------
// Authentication

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[get("/login")]
pub async fn login_handler() -> Result<impl Responder, AppError> {
    let mut context = Context::new();
    context.insert("title", "Login");
    context.insert("username_error", "");
    context.insert("password_error", "");
    render("login.html", &context)
}

#[post("/login")]
pub async fn login_form_handler(
    web::Form(form): web::Form<LoginForm>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let username = form.username.trim();
    let password = form.password.trim();

    let mut username_error = "";
    let mut password_error = "";
    if username.is_empty() {
        username_error = "Please enter a username";
    }
    if password.is_empty() {
        password_error = "Please enter a password";
    }

    if username_error.is_empty() && password_error.is_empty() {
        let user = db::get_user_by_username(&state, username).await?;
        match user {
            Some(user) if utils::verify_password(password, &user.password) => {
                Identity::login(&request.extensions(), user.email.clone())
                    .map_err(|e| AppError::LoginError(e.to_string()))?;
                return Ok(see_other("/dashboard"));
            }
            _ => {
                log::warn!("Failed login attempt for username {:?}", username);
                password_error = "Incorrect username or password";
            }
        }
    }

    let mut context = Context::new();
    context.insert("title", "Login");
    context.insert("username_error", username_error);
    context.insert("password_error", password_error);
    render("login.html", &context)
}

#[derive(Deserialize)]
pub struct ForgotPasswordForm {
    email: String,
    new_username: String,
    new_password: String,
}

#[get("/forgot_password")]
pub async fn forgot_password_handler() -> Result<impl Responder, AppError> {
    let mut context = Context::new();
    context.insert("title", "Account Recovery");
    context.insert("error", "");
    context.insert("message", "");
    render("forgot_password.html", &context)
}

#[post("/forgot_password")]
pub async fn forgot_password_form_handler(
    web::Form(form): web::Form<ForgotPasswordForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let email = form.email.trim();
    let new_username = form.new_username.trim();
    let new_password = form.new_password.trim();

    let mut error = String::new();
    let mut message = String::new();

    if email.is_empty() {
        error = "Please enter an email address.".to_owned();
    } else {
        match db::get_user_by_email(&state, email).await? {
            None => error = "No account found for that email.".to_owned(),
            Some(user) => {
                if !new_username.is_empty()
                    && db::username_in_use(&state, new_username, Some(email)).await?
                {
                    error = "That username is already taken. Please choose another.".to_owned();
                } else if new_username.is_empty() && new_password.is_empty() {
                    error = "Enter a new username or password to update.".to_owned();
                } else {
                    let hashed = if new_password.is_empty() {
                        None
                    } else {
                        Some(utils::hash_password(new_password)?)
                    };
                    let username = (!new_username.is_empty()).then_some(new_username);
                    db::update_user_fields(&state, user.id, None, username, hashed.as_deref())
                        .await?;
                    message = "Details updated successfully.".to_owned();
                }
            }
        }
    }

    let mut context = Context::new();
    context.insert("title", "Account Recovery");
    context.insert("error", &error);
    context.insert("message", &message);
    render("forgot_password.html", &context)
}

// ---------------------------------------------------------------------------
// Dashboard

#[derive(Serialize)]
struct DashboardRow {
    borrower: Borrower,
    device: Option<Device>,
    paid: f64,
    remaining: f64,
}

#[get("/dashboard")]
pub async fn dashboard_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }

    let borrowers = db::get_all_borrowers(&state).await?;
    let paid_totals: std::collections::HashMap<i64, f64> = db::payments_by_borrower(&state)
        .await?
        .into_iter()
        .map(|row| (row.borrower_id, row.total_paid))
        .collect();

    // One device lookup per borrower, display only.
    let mut rows = Vec::with_capacity(borrowers.len());
    for borrower in borrowers {
        let device = db::latest_device_for(&state, borrower.id).await?;
        let paid = paid_totals.get(&borrower.id).copied().unwrap_or(0.0);
        let remaining = borrower.total_amount - paid;
        rows.push(DashboardRow {
            borrower,
            device,
            paid,
            remaining,
        });
    }

    let total_loans = db::sum_all_loans(&state).await?;
    let total_paid = db::sum_all_payments(&state).await?;

    let mut context = Context::new();
    context.insert("title", "Dashboard");
    context.insert("rows", &rows);
    context.insert("total_loans", &total_loans);
    context.insert("total_paid", &total_paid);
    context.insert("total_remaining", &(total_loans - total_paid));
    context.insert("flash", &utils::take_flash(&session).unwrap_or_default());
    render("dashboard.html", &context)
}

#[derive(Deserialize)]
pub struct CheckNameQuery {
    name: Option<String>,
    borrower_id: Option<String>,
}

/// Live duplicate-name check used by the loan forms.
#[get("/check_name")]
pub async fn check_name_handler(
    state: Data<AppState>,
    query: web::Query<CheckNameQuery>,
) -> Result<impl Responder, AppError> {
    let name = query.name.as_deref().unwrap_or("").trim().to_owned();
    if name.is_empty() {
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "exists": false })));
    }
    let exclude_id = query
        .borrower_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    let exists = db::borrower_name_exists(&state, &name, exclude_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "exists": exists })))
}

// ---------------------------------------------------------------------------
// Loans / borrowers

#[derive(Debug, MultipartForm)]
pub struct AddLoanForm {
    name: Text<String>,
    number_phone: Text<String>,
    total_amount: Text<String>,
    notes: Text<String>,
    device_description: Text<String>,
    loan_date: Text<String>,
    device_image: Option<TempFile>,
}

fn add_loan_context(
    borrowers: &[String],
    form: Option<&AddLoanForm>,
    name_error: &str,
) -> Context {
    let mut context = Context::new();
    context.insert("title", "Add Loan");
    context.insert("borrowers", borrowers);
    context.insert("today", &utils::today());
    context.insert("name_error", name_error);
    context.insert("name", form.map(|f| f.name.trim()).unwrap_or(""));
    context.insert(
        "number_phone",
        form.map(|f| f.number_phone.trim()).unwrap_or(""),
    );
    context.insert(
        "total_amount",
        form.map(|f| f.total_amount.trim()).unwrap_or(""),
    );
    context.insert("notes", form.map(|f| f.notes.trim()).unwrap_or(""));
    context.insert(
        "device_description",
        form.map(|f| f.device_description.trim()).unwrap_or(""),
    );
    context.insert("loan_date", form.map(|f| f.loan_date.trim()).unwrap_or(""));
    context
}

#[get("/add_loan")]
pub async fn add_loan_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let borrowers = db::borrower_names(&state).await?;
    render("add_loan.html", &add_loan_context(&borrowers, None, ""))
}

#[post("/add_loan")]
pub async fn add_loan_form_handler(
    MultipartForm(form): MultipartForm<AddLoanForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }

    let name = form.name.trim().to_owned();
    let number_phone = form.number_phone.trim().to_owned();
    let amount = utils::parse_amount(&form.total_amount);

    let mut name_error = "";
    if name.is_empty() || number_phone.is_empty() || amount.is_none() {
        name_error = "Please fill in all required fields";
    } else if db::borrower_name_exists(&state, &name, None).await? {
        name_error = "This name is already registered";
    }

    if !name_error.is_empty() {
        let borrowers = db::borrower_names(&state).await?;
        return render(
            "add_loan.html",
            &add_loan_context(&borrowers, Some(&form), name_error),
        );
    }

    let device_image = match &form.device_image {
        Some(file) => utils::save_upload(file, &state.upload_dir)?,
        None => None,
    };
    let loan = NewLoan {
        name,
        number_phone,
        total_amount: amount.unwrap_or(0.0),
        notes: form.notes.trim().to_owned(),
        device_description: form.device_description.trim().to_owned(),
        device_image,
        loan_date: form.loan_date.trim().to_owned(),
    };
    db::create_borrower(&state, &loan).await?;

    Ok(see_other("/dashboard"))
}

#[derive(Deserialize)]
pub struct EditBorrowerForm {
    name: String,
    number_phone: String,
    total_amount: String,
    notes: String,
}

#[get("/edit_borrower/{borrower_id}")]
pub async fn edit_borrower_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let Some(borrower) = db::get_borrower(&state, path.into_inner()).await? else {
        return Ok(see_other("/dashboard"));
    };

    let mut context = Context::new();
    context.insert("title", "Edit Borrower");
    context.insert("borrower", &borrower);
    context.insert("today", &utils::today());
    context.insert("name_error", "");
    render("edit_borrower.html", &context)
}

#[post("/edit_borrower/{borrower_id}")]
pub async fn edit_borrower_form_handler(
    web::Form(form): web::Form<EditBorrowerForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let borrower_id = path.into_inner();

    let name = form.name.trim().to_owned();
    let number_phone = form.number_phone.trim().to_owned();
    let amount = utils::parse_amount(&form.total_amount);

    let mut name_error = "";
    if name.is_empty() || number_phone.is_empty() || amount.is_none() {
        name_error = "Please fill in all required fields";
    } else if db::borrower_name_exists(&state, &name, Some(borrower_id)).await? {
        name_error = "This name is already registered";
    }

    if !name_error.is_empty() {
        let Some(borrower) = db::get_borrower(&state, borrower_id).await? else {
            return Ok(see_other("/dashboard"));
        };
        let mut context = Context::new();
        context.insert("title", "Edit Borrower");
        context.insert("borrower", &borrower);
        context.insert("today", &utils::today());
        context.insert("name_error", name_error);
        return render("edit_borrower.html", &context);
    }

    db::update_borrower(
        &state,
        borrower_id,
        &name,
        &number_phone,
        amount.unwrap_or(0.0),
        form.notes.trim(),
    )
    .await?;
    Ok(see_other(&format!("/edit_borrower/{}", borrower_id)))
}

#[derive(Debug, MultipartForm)]
pub struct UpdateLoanForm {
    id: Text<String>,
    additional_amount: Text<String>,
    loan_date: Text<String>,
    device_description: Text<String>,
    device_image: Option<TempFile>,
}

/// Top-up: the increment is recorded as its own device row.
#[post("/update_loan")]
pub async fn update_loan_form_handler(
    MultipartForm(form): MultipartForm<UpdateLoanForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }

    let borrower_id = form.id.trim().parse::<i64>().ok();
    let raw_amount = form.additional_amount.trim();
    let (Some(borrower_id), false) = (borrower_id, raw_amount.is_empty()) else {
        utils::flash(&session, "Please fill in all fields");
        return Ok(see_other("/dashboard"));
    };
    let Some(amount) = utils::parse_amount(raw_amount) else {
        utils::flash(&session, "Please enter a valid amount");
        return Ok(see_other("/dashboard"));
    };
    if amount <= 0.0 {
        utils::flash(&session, "Amount must be greater than zero");
        return Ok(see_other("/dashboard"));
    }

    let device_image = match &form.device_image {
        Some(file) => utils::save_upload(file, &state.upload_dir)?,
        None => None,
    };
    let loan_date = if form.loan_date.trim().is_empty() {
        utils::today()
    } else {
        form.loan_date.trim().to_owned()
    };
    db::top_up_loan(
        &state,
        borrower_id,
        amount,
        form.device_description.trim(),
        device_image,
        &loan_date,
    )
    .await?;

    Ok(see_other(&format!("/edit_borrower/{}", borrower_id)))
}

#[derive(Deserialize)]
pub struct DeleteForm {
    id: String,
}

#[post("/delete_borrower")]
pub async fn delete_borrower_form_handler(
    web::Form(form): web::Form<DeleteForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let Some(borrower_id) = form.id.trim().parse::<i64>().ok() else {
        utils::flash(&session, "No borrower selected");
        return Ok(see_other("/dashboard"));
    };
    db::delete_borrower(&state, borrower_id).await?;
    Ok(see_other("/dashboard"))
}

// ---------------------------------------------------------------------------
// Payments

#[derive(Serialize)]
struct PaymentOption {
    borrower: Borrower,
    remaining: f64,
}

#[derive(Deserialize)]
pub struct AddPaymentForm {
    borrower_name: String,
    amount_paid: String,
    payment_date: String,
}

#[get("/add_payment")]
pub async fn add_payment_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }

    let borrowers = db::get_all_borrowers(&state).await?;
    let mut options = Vec::with_capacity(borrowers.len());
    for borrower in borrowers {
        let paid = db::sum_payments_for(&state, borrower.id).await?;
        let remaining = borrower.total_amount - paid;
        options.push(PaymentOption {
            borrower,
            remaining,
        });
    }

    let mut context = Context::new();
    context.insert("title", "Add Payment");
    context.insert("options", &options);
    context.insert("today", &utils::today());
    context.insert("flash", &utils::take_flash(&session).unwrap_or_default());
    render("add_payment.html", &context)
}

#[post("/add_payment")]
pub async fn add_payment_form_handler(
    web::Form(form): web::Form<AddPaymentForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }

    let borrower_name = form.borrower_name.trim();
    let payment_date = form.payment_date.trim();
    if borrower_name.is_empty() || form.amount_paid.trim().is_empty() || payment_date.is_empty() {
        utils::flash(&session, "Please fill in all required fields");
        return Ok(see_other("/add_payment"));
    }
    let Some(amount) = utils::parse_amount(&form.amount_paid) else {
        utils::flash(&session, "Please enter a valid amount");
        return Ok(see_other("/add_payment"));
    };

    match db::record_payment(&state, borrower_name, amount, payment_date).await? {
        PaymentOutcome::Recorded => Ok(see_other("/dashboard")),
        PaymentOutcome::UnknownBorrower => {
            utils::flash(&session, "That name is not in the system");
            Ok(see_other("/add_payment"))
        }
        PaymentOutcome::AlreadySettled => {
            utils::flash(&session, "This borrower is fully settled - no amount remaining");
            Ok(see_other("/add_payment"))
        }
        PaymentOutcome::ExceedsRemaining { remaining } => {
            utils::flash(
                &session,
                &format!(
                    "Amount exceeds the remaining balance ({})",
                    utils::format_with_commas(remaining)
                ),
            );
            Ok(see_other("/add_payment"))
        }
    }
}

#[derive(Debug, MultipartForm)]
pub struct EditPaymentForm {
    amount_paid: Text<String>,
    payment_date: Text<String>,
    device_description: Text<String>,
    device_image: Option<TempFile>,
}

#[get("/edit_payment/{payment_id}")]
pub async fn edit_payment_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let Some(payment) = db::get_payment(&state, path.into_inner()).await? else {
        return Ok(see_other("/dashboard"));
    };

    let mut context = Context::new();
    context.insert("title", "Edit Payment");
    context.insert("payment", &payment);
    render("edit_payment.html", &context)
}

/// Overwrites the payment as submitted. The remaining-balance check
/// runs at creation only (see DESIGN.md).
#[post("/edit_payment/{payment_id}")]
pub async fn edit_payment_form_handler(
    MultipartForm(form): MultipartForm<EditPaymentForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let payment_id = path.into_inner();

    let payment_date = form.payment_date.trim();
    let amount = utils::parse_amount(&form.amount_paid);
    let (Some(amount), false) = (amount, payment_date.is_empty()) else {
        return Ok(see_other("/dashboard"));
    };

    let device_image = match &form.device_image {
        Some(file) => utils::save_upload(file, &state.upload_dir)?,
        None => None,
    };
    db::update_payment(
        &state,
        payment_id,
        amount,
        payment_date,
        form.device_description.trim(),
        device_image,
    )
    .await?;

    Ok(see_other("/dashboard"))
}

#[post("/delete_payment")]
pub async fn delete_payment_form_handler(
    web::Form(form): web::Form<DeleteForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    if let Ok(payment_id) = form.id.trim().parse::<i64>() {
        db::delete_payment(&state, payment_id).await?;
    }
    Ok(see_other("/dashboard"))
}

// ---------------------------------------------------------------------------
// Loan status & devices

#[get("/loan_status/{borrower_id}")]
pub async fn loan_status_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let borrower_id = path.into_inner();
    let Some(borrower) = db::get_borrower(&state, borrower_id).await? else {
        return Ok(see_other("/dashboard"));
    };

    let payments = db::payments_for_borrower(&state, borrower_id).await?;
    let total_paid = db::sum_payments_for(&state, borrower_id).await?;
    let device = db::latest_device_for(&state, borrower_id).await?;

    let mut context = Context::new();
    context.insert("title", "Loan Status");
    context.insert("borrower", &borrower);
    context.insert("payments", &payments);
    context.insert("total_paid", &total_paid);
    context.insert("remaining", &(borrower.total_amount - total_paid));
    context.insert("device", &device);
    render("loan_status.html", &context)
}

#[get("/device_details/{borrower_id}")]
pub async fn device_details_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    let borrower_id = path.into_inner();
    let Some(borrower) = db::get_borrower(&state, borrower_id).await? else {
        utils::flash(&session, "Borrower not found");
        return Ok(see_other("/dashboard"));
    };

    let devices = db::devices_for_borrower(&state, borrower_id).await?;

    let mut context = Context::new();
    context.insert("title", "Device Details");
    context.insert("borrower", &borrower);
    context.insert("devices", &devices);
    context.insert("flash", &utils::take_flash(&session).unwrap_or_default());
    render("device_details.html", &context)
}

#[post("/delete_device/{device_id}")]
pub async fn delete_device_form_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    path: web::Path<i64>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if auth_email(&identity).is_none() {
        return Ok(see_other("/login"));
    }
    match db::delete_device(&state, path.into_inner()).await? {
        Some(borrower_id) => Ok(see_other(&format!("/device_details/{}", borrower_id))),
        None => {
            utils::flash(&session, "Device not found");
            Ok(see_other("/dashboard"))
        }
    }
}

// ---------------------------------------------------------------------------
// Profile

#[derive(Deserialize)]
pub struct UpdateUserForm {
    email: String,
    username: String,
    password: String,
}

#[get("/update_user")]
pub async fn update_user_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let Some(email) = auth_email(&identity) else {
        return Ok(see_other("/login"));
    };
    let Some(user) = db::get_user_by_email(&state, &email).await? else {
        return Ok(see_other("/dashboard"));
    };

    let mut context = Context::new();
    context.insert("title", "Account Settings");
    context.insert("user", &user);
    context.insert("message", "");
    context.insert("error", "");
    render("update_user.html", &context)
}

#[post("/update_user")]
pub async fn update_user_form_handler(
    web::Form(form): web::Form<UpdateUserForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let Some(current_email) = auth_email(&identity) else {
        return Ok(see_other("/login"));
    };
    let Some(current_user) = db::get_user_by_email(&state, &current_email).await? else {
        return Ok(see_other("/dashboard"));
    };

    let email = form.email.trim().to_owned();
    let username = form.username.trim().to_owned();
    let password = form.password.trim().to_owned();

    let mut message = String::new();
    let mut error = String::new();

    let email_changed = !email.is_empty() && email != current_user.email;
    let username_changed = !username.is_empty() && username != current_user.username;

    if email.is_empty() {
        error = "Email is required".to_owned();
    } else if email_changed && db::email_in_use(&state, &email).await? {
        error = "Email already in use".to_owned();
    } else if username_changed && db::username_in_use(&state, &username, None).await? {
        error = "Username already in use".to_owned();
    } else {
        let hashed = if password.is_empty() {
            None
        } else {
            Some(utils::hash_password(&password)?)
        };
        if !email_changed && !username_changed && hashed.is_none() {
            message = "No changes were made".to_owned();
        } else {
            let result = db::update_user_fields(
                &state,
                current_user.id,
                email_changed.then_some(email.as_str()),
                username_changed.then_some(username.as_str()),
                hashed.as_deref(),
            )
            .await;
            match result {
                Ok(()) => {
                    message = "Details updated successfully".to_owned();
                    if email_changed {
                        Identity::login(&request.extensions(), email.clone())
                            .map_err(|e| AppError::LoginError(e.to_string()))?;
                    }
                }
                Err(e) => {
                    // Uniqueness races surface here; keep the message generic.
                    log::error!("Failed to update user {}: {}", current_user.id, e);
                    error = "An error occurred while updating the details".to_owned();
                }
            }
        }
    }

    let lookup_email = if error.is_empty() && email_changed {
        &email
    } else {
        &current_email
    };
    let Some(user) = db::get_user_by_email(&state, lookup_email).await? else {
        return Ok(see_other("/dashboard"));
    };

    let mut context = Context::new();
    context.insert("title", "Account Settings");
    context.insert("user", &user);
    context.insert("message", &message);
    context.insert("error", &error);
    render("update_user.html", &context)
}
