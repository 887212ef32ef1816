use crate::Event;
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct MousePorts {
    vector: U16<BigEndian>,
    x: U16<BigEndian>,
    y: U16<BigEndian>,
    state: u8,
    wheel: u8,
    _pad: [u8; 8],
}

static_assertions::assert_eq_size!(MousePorts, [u8; 16]);

impl Ports for MousePorts {
    const BASE: u8 = 0x90;
}

/// Stored mouse state
#[derive(Default)]
pub struct Mouse {
    pos: (u16, u16),
    buttons: u8,
}

/// Update to mouse state
#[derive(Copy, Clone, Default, Debug)]
pub struct MouseState {
    /// Current position
    pub pos: (u16, u16),

    /// Bitfield of button state (bit 0: left, bit 1: middle, bit 2: right)
    pub buttons: u8,

    /// Wheel movement for this update, in ticks
    pub wheel: i8,
}

impl Mouse {
    pub fn new() -> Self {
        Mouse::default()
    }

    /// Updates the internal mouse state, pushing an event if it has changed
    pub fn update(
        &mut self,
        vm: &mut Uxn,
        state: MouseState,
        queue: &mut Vec<Event>,
    ) {
        let mut changed = false;
        let m = vm.dev_mut::<MousePorts>();

        if state.pos != self.pos {
            m.x.set(state.pos.0);
            m.y.set(state.pos.1);
            changed = true;
            self.pos = state.pos;
        }

        // The wheel register holds a one-tick delta per update
        m.wheel = state.wheel as u8;
        changed |= state.wheel != 0;

        if state.buttons != self.buttons {
            m.state = state.buttons;
            changed = true;
            self.buttons = state.buttons;
        }

        if changed {
            queue.push(Event {
                data: None,
                vector: m.vector.get(),
            });
        }
    }
}
