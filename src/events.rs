// Surface notifications
//
// Window events are queued as they arrive and consumed once per loop
// iteration. Only the latest size matters, and a close request beats any
// pending resize.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<SurfaceEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SurfaceEvent) {
        self.pending.push(event);
    }

    /// Take everything queued since the last poll, reduced to the one event
    /// that still matters
    pub fn poll(&mut self) -> Option<SurfaceEvent> {
        let mut latest = None;
        for event in self.pending.drain(..) {
            match event {
                SurfaceEvent::CloseRequested => latest = Some(event),
                SurfaceEvent::Resized { .. } => {
                    if latest != Some(SurfaceEvent::CloseRequested) {
                        latest = Some(event);
                    }
                }
            }
        }
        latest
    }
}
