pub mod inventory;
pub mod ticket_type;

pub use inventory::{
    InventoryError, InventoryLedger, MemoryInventoryLedger, Reservation, ReservationState,
};
pub use ticket_type::{EventSummary, TicketType, TicketTypeRepository};
