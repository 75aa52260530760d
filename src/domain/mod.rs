//! Timing domain model.
//!
//! ```text
//! Competition
//!   ├─ tracks: BTreeMap<id, Track>
//!   │            ├─ pending: Option<Car>
//!   │            └─ running: VecDeque<Car>   (len <= overwrap_limit)
//!   └─ finished: Vec<FinishedCar>            (stop order)
//! ```
//!
//! A [`Competition`] is never mutated directly: it implements
//! [`Replayable`](crate::replay::Replayable) and every change goes through a
//! [`Replayer`](crate::replay::Replayer).

mod car;
mod competition;
mod error;
mod timer;
mod track;

pub use car::Car;
pub use competition::{Competition, CompetitionCommand, CompetitionOutput, FinishedCar};
pub use error::DomainError;
pub use timer::Timer;
pub use track::{StoppedCar, Track};
