pub mod payment;
pub mod payment_form;
pub mod product;
pub mod transaction;
pub mod wire_id;
