pub mod checkout;
pub mod expiry;
pub mod issuer;
pub mod memory;
pub mod models;
pub mod reconciler;
pub mod repository;

pub use checkout::{CheckoutError, CheckoutService, RequestedItem};
pub use expiry::ReservationSweeper;
pub use issuer::{IssueError, TicketIssuer};
pub use models::{BuyerInfo, Order, OrderItem, PaymentStatus, PurchasedTicket};
pub use reconciler::{Ack, MockPaymentAdapter, PaymentReconciler, ReconcileError};
pub use repository::{OrderRepository, TicketRepository};
