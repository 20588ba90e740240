//! Event handlers of the user domain.
//!
//! | Handler              | Event              | Effect                         |
//! |----------------------|--------------------|--------------------------------|
//! | `SendWelcomeEmail`   | `UserRegistered`   | welcome email to the new user  |
//! | `AddUserToCrm`       | `UserRegistered`   | user pushed to the CRM         |
//! | `ConfirmEmailChange` | `UserEmailUpdated` | confirmation to the new address |
//!
//! Each handler consumes in its own consumer group. Redelivery can repeat a
//! call, so both collaborators must tolerate duplicates.

use std::sync::Arc;

use tracing::info;

use super::clients::{CrmClient, CrmUser, Email, EmailSender};
use super::events::{UserEmailUpdated, UserRegistered};
use crate::cqrs::{EventProcessor, ProcessorError};
use crate::router::{HandlerError, Router};

pub const SEND_WELCOME_EMAIL: &str = "SendWelcomeEmail";
pub const ADD_USER_TO_CRM: &str = "AddUserToCrm";
pub const CONFIRM_EMAIL_CHANGE: &str = "ConfirmEmailChange";

pub fn welcome_email(event: &UserRegistered) -> Email {
    Email {
        email: event.email.clone(),
        subject: "Welcome to our website!".to_string(),
        body: format!("Hello {},\n\nThank you for registering!", event.name),
    }
}

pub fn confirmation_email(event: &UserEmailUpdated) -> Email {
    Email {
        email: event.new_email.clone(),
        subject: "Confirm your new email address".to_string(),
        body: "Hello,\n\nPlease confirm this is your new email address.".to_string(),
    }
}

pub async fn send_welcome_email(
    sender: &dyn EmailSender,
    event: UserRegistered,
) -> Result<(), HandlerError> {
    sender
        .send_email(&welcome_email(&event))
        .await
        .map_err(HandlerError::failed)?;
    info!(user_id = %event.user_id, "Welcome email sent");
    Ok(())
}

pub async fn add_user_to_crm(
    crm: &dyn CrmClient,
    event: UserRegistered,
) -> Result<(), HandlerError> {
    crm.add_user(&CrmUser {
        user_id: event.user_id,
        name: event.name,
        email: event.email,
    })
    .await
    .map_err(HandlerError::failed)?;
    info!(user_id = %event.user_id, "User added to CRM");
    Ok(())
}

pub async fn confirm_email_change(
    sender: &dyn EmailSender,
    event: UserEmailUpdated,
) -> Result<(), HandlerError> {
    sender
        .send_email(&confirmation_email(&event))
        .await
        .map_err(HandlerError::failed)?;
    info!(user_id = %event.user_id, "Email change confirmation sent");
    Ok(())
}

/// Register all user handlers on `router`.
pub fn register_handlers(
    processor: &EventProcessor,
    router: &mut Router,
    email: Arc<dyn EmailSender>,
    crm: Arc<dyn CrmClient>,
) -> Result<(), ProcessorError> {
    {
        let email = email.clone();
        processor.add_handler(router, SEND_WELCOME_EMAIL, move |event: UserRegistered| {
            let email = email.clone();
            async move { send_welcome_email(email.as_ref(), event).await }
        })?;
    }

    processor.add_handler(router, ADD_USER_TO_CRM, move |event: UserRegistered| {
        let crm = crm.clone();
        async move { add_user_to_crm(crm.as_ref(), event).await }
    })?;

    processor.add_handler(router, CONFIRM_EMAIL_CHANGE, move |event: UserEmailUpdated| {
        let email = email.clone();
        async move { confirm_email_change(email.as_ref(), event).await }
    })?;

    Ok(())
}
