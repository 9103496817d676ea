//! Wire protocols of the two controller links.
//!
//! | Link      | Module     | Controller                    | Framing              |
//! |-----------|------------|-------------------------------|----------------------|
//! | Channel A | [`vmc`]    | Slot-release (VMC)            | Binary, XOR checksum |
//! | Channel B | [`motion`] | Lift, door and rack lock      | ASCII lines          |
//!
//! Both modules are pure: no I/O, no clocks.  Each provides a streaming
//! decoder so that reads split or merged by the serial driver still
//! yield whole frames.

pub mod motion;
pub mod vmc;
