// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Message validation module.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use voiceroom_common::ClientToServer;

// Common validation constants
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 32;
const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_DISPLAY_NAME_LENGTH: usize = 40;
const MAX_ROOM_TITLE_LENGTH: usize = 60;
const MAX_BIO_LENGTH: usize = 300;
const MAX_CHAT_LENGTH: usize = 500;
const MAX_PROMPT_LENGTH: usize = 1000;
const MAX_URL_LENGTH: usize = 2048;
/// Upper bound on one gift's quantity
pub const MAX_GIFT_QUANTITY: u64 = 9_999;

// Regex patterns for validation
static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").unwrap());
static DISPLAY_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{7}$").unwrap());
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://[^\s<>]+$").unwrap());
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^<>{}\[\]\\]*$").unwrap());

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid text: {0}")]
    InvalidText(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid display id: {0}")]
    InvalidDisplayId(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

pub fn validate_username(username: &str) -> ValidationResult<&str> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ValidationError::InvalidUsername(format!(
            "Username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::InvalidUsername(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(username)
}

/// Validate a password
pub fn validate_password(password: &str) -> ValidationResult<&str> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::InvalidPassword(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::InvalidPassword(format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }

    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_letter && has_digit) {
        return Err(ValidationError::InvalidPassword(
            "Password must contain at least one letter and one number".to_string(),
        ));
    }

    Ok(password)
}

/// Display names and room titles: non-blank, bounded, no markup characters
fn validate_name<'a>(what: &str, name: &'a str, max: usize) -> ValidationResult<&'a str> {
    if name.trim().is_empty() {
        return Err(ValidationError::InvalidName(format!("{what} must not be empty")));
    }
    if name.chars().count() > max {
        return Err(ValidationError::InvalidName(format!(
            "{what} must be between 1 and {max} characters"
        )));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidName(format!("{what} contains invalid characters")));
    }
    Ok(name)
}

pub fn validate_display_name(name: &str) -> ValidationResult<&str> {
    validate_name("Display name", name, MAX_DISPLAY_NAME_LENGTH)
}

pub fn validate_room_title(title: &str) -> ValidationResult<&str> {
    validate_name("Room title", title, MAX_ROOM_TITLE_LENGTH)
}

fn validate_text<'a>(what: &str, text: &'a str, max: usize, allow_empty: bool) -> ValidationResult<&'a str> {
    if !allow_empty && text.trim().is_empty() {
        return Err(ValidationError::InvalidText(format!("{what} must not be empty")));
    }
    if text.chars().count() > max {
        return Err(ValidationError::InvalidText(format!("{what} cannot exceed {max} characters")));
    }
    Ok(text)
}

/// Chat lines, private messages and welcome greetings
pub fn validate_message_text(text: &str) -> ValidationResult<&str> {
    validate_text("Message", text, MAX_CHAT_LENGTH, false)
}

pub fn validate_bio(bio: &str) -> ValidationResult<&str> {
    validate_text("Bio", bio, MAX_BIO_LENGTH, true)
}

pub fn validate_prompt(prompt: &str) -> ValidationResult<&str> {
    validate_text("Prompt", prompt, MAX_PROMPT_LENGTH, false)
}

pub fn validate_url(url: &str) -> ValidationResult<&str> {
    if url.len() > MAX_URL_LENGTH || !URL_REGEX.is_match(url) {
        return Err(ValidationError::InvalidUrl(
            "URL must be an http(s) address without whitespace".to_string(),
        ));
    }
    Ok(url)
}

pub fn validate_display_id(display_id: &str) -> ValidationResult<&str> {
    if !DISPLAY_ID_REGEX.is_match(display_id) {
        return Err(ValidationError::InvalidDisplayId(
            "Display id must be exactly 7 digits".to_string(),
        ));
    }
    Ok(display_id)
}

/// Validate the session token format
pub fn validate_session_token(token: &str) -> ValidationResult<&str> {
    match uuid::Uuid::parse_str(token) {
        Ok(_) => Ok(token),
        Err(_) => Err(ValidationError::InvalidText("Invalid session token format".to_string())),
    }
}

fn validate_positive(what: &str, amount: u64) -> ValidationResult<u64> {
    if amount == 0 {
        return Err(ValidationError::InvalidAmount(format!("{what} must be positive")));
    }
    Ok(amount)
}

/// Shape checks on a client message before it reaches the services.
/// Business rules (balances, permissions, seat state) are checked later.
pub fn validate_client_message(message: &ClientToServer) -> ValidationResult<()> {
    match message {
        ClientToServer::Register {
            username,
            password,
            display_name,
        } => {
            validate_username(username)?;
            validate_password(password)?;
            validate_display_name(display_name)?;
        },
        ClientToServer::Login { username, password } => {
            validate_username(username)?;
            if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH {
                return Err(ValidationError::InvalidPassword("Password has an invalid length".to_string()));
            }
        },
        ClientToServer::Resume { session_token } => {
            validate_session_token(session_token)?;
        },
        ClientToServer::LookupDisplayId { display_id } => {
            validate_display_id(display_id)?;
        },
        ClientToServer::UpdateProfile {
            display_name,
            avatar_url,
            bio,
        } => {
            if let Some(name) = display_name {
                validate_display_name(name)?;
            }
            if let Some(url) = avatar_url {
                validate_url(url)?;
            }
            if let Some(bio) = bio {
                validate_bio(bio)?;
            }
        },
        ClientToServer::CreateRoom { title, .. } => {
            validate_room_title(title)?;
        },
        ClientToServer::UpdateRoom { settings, .. } => {
            if let Some(title) = &settings.title {
                validate_room_title(title)?;
            }
        },
        ClientToServer::SendGift {
            quantity, recipients, ..
        } => {
            validate_positive("Gift quantity", *quantity)?;
            if recipients.is_empty() {
                return Err(ValidationError::InvalidAmount("A gift needs at least one recipient".to_string()));
            }
            if *quantity > MAX_GIFT_QUANTITY {
                return Err(ValidationError::InvalidAmount(format!(
                    "Gift quantity cannot exceed {MAX_GIFT_QUANTITY}"
                )));
            }
        },
        ClientToServer::ExchangeCoins { coins } => {
            validate_positive("Coins", *coins)?;
        },
        ClientToServer::GrantDiamonds { amount, .. } => {
            validate_positive("Amount", *amount)?;
        },
        ClientToServer::SendRoomMessage { text, .. }
        | ClientToServer::SendPrivateMessage { text, .. }
        | ClientToServer::RequestWelcome { message: text } => {
            validate_message_text(text)?;
        },
        ClientToServer::AskAiHost { prompt, .. } => {
            validate_prompt(prompt)?;
        },
        ClientToServer::CreateBanner { image_url, link, .. } => {
            validate_url(image_url)?;
            if let Some(link) = link {
                validate_url(link)?;
            }
        },
        ClientToServer::UpsertStoreItem { item } => {
            validate_name("Item name", &item.name, MAX_DISPLAY_NAME_LENGTH)?;
            validate_positive("Duration", u64::from(item.duration_days))?;
            if let Some(url) = &item.image_url {
                validate_url(url)?;
            }
        },
        ClientToServer::UpsertGift { gift } => {
            validate_name("Gift name", &gift.name, MAX_DISPLAY_NAME_LENGTH)?;
            validate_positive("Gift price", gift.price)?;
        },
        _ => {},
    }

    Ok(())
}
