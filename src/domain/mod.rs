mod ledger;
mod loan;
mod money;

pub use ledger::*;
pub use loan::*;
pub use money::*;
