use rust_decimal::Decimal;
use tracing::error;
use ulid::Ulid;

use crate::store::BookingView;

use super::{BookingError, Rejection};

/// Reject a payment write that would push the appointment's payments above
/// its total cost. `prior_amount` is the payment's current amount when
/// updating one, `None` when recording a new one. Reaching the cost exactly
/// is fine.
///
/// The caller has already established that the appointment exists.
pub async fn check_payment<V: BookingView + ?Sized>(
    view: &V,
    appointment_id: Ulid,
    new_amount: Decimal,
    prior_amount: Option<Decimal>,
) -> Result<(), BookingError> {
    let Some(total_cost) = view.total_cost(appointment_id).await? else {
        error!(%appointment_id, "appointment has no total cost");
        return Err(BookingError::InvariantViolation(format!(
            "appointment {appointment_id} has no total cost"
        )));
    };

    let total_paid = paid_so_far(view, appointment_id)
        .await?
        .checked_sub(prior_amount.unwrap_or(Decimal::ZERO))
        .and_then(|sum| sum.checked_add(new_amount))
        .ok_or(BookingError::LimitExceeded("payment total out of range"))?;

    if total_paid > total_cost {
        return Err(Rejection::Overpayment {
            appointment_id,
            total_paid,
            total_cost,
        }
        .into());
    }
    Ok(())
}

/// Reject lowering an appointment's cost below what has already been paid.
pub async fn check_total_cost<V: BookingView + ?Sized>(
    view: &V,
    appointment_id: Ulid,
    new_total_cost: Decimal,
) -> Result<(), BookingError> {
    let total_paid = paid_so_far(view, appointment_id).await?;
    if total_paid > new_total_cost {
        return Err(Rejection::Overpayment {
            appointment_id,
            total_paid,
            total_cost: new_total_cost,
        }
        .into());
    }
    Ok(())
}

async fn paid_so_far<V: BookingView + ?Sized>(
    view: &V,
    appointment_id: Ulid,
) -> Result<Decimal, BookingError> {
    view.payments_for(appointment_id)
        .await?
        .iter()
        .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.amount))
        .ok_or(BookingError::LimitExceeded("payment total out of range"))
}
