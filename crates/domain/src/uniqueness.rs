//! Document and email uniqueness checks.
//!
//! These run inside the command's unit of work, before any mutation. The
//! backends repeat the check at write/commit time, so a create that races
//! past these reads still loses with a `Conflict`.

use common::AggregateId;

use crate::error::{Conflict, DomainError, UniqueField};
use crate::repository::CustomerRepository;

/// Whether another customer holds `document`. `excluding` lets a customer
/// keep its own document on update.
pub async fn document_taken(
    repo: &mut dyn CustomerRepository,
    document: &str,
    excluding: Option<AggregateId>,
) -> Result<bool, DomainError> {
    Ok(repo.document_exists(document, excluding).await?)
}

pub async fn email_taken(
    repo: &mut dyn CustomerRepository,
    email: &str,
    excluding: Option<AggregateId>,
) -> Result<bool, DomainError> {
    Ok(repo.email_exists(email, excluding).await?)
}

/// Fails with `Conflict::Duplicate` naming the first field already taken.
pub async fn ensure_available(
    repo: &mut dyn CustomerRepository,
    document: &str,
    email: &str,
    excluding: Option<AggregateId>,
) -> Result<(), DomainError> {
    if document_taken(repo, document, excluding).await? {
        return Err(Conflict::Duplicate {
            field: UniqueField::Document,
            value: document.to_string(),
        }
        .into());
    }
    if email_taken(repo, email, excluding).await? {
        return Err(Conflict::Duplicate {
            field: UniqueField::Email,
            value: email.to_string(),
        }
        .into());
    }
    Ok(())
}
