//! Jacks and the patch-cable wiring graph.
//!
//! A jack is a named connection point on a unit.  Input jacks carry a
//! receive callback which fires when a pulse arrives; output jacks may
//! carry a post-transmit callback for side effects such as tracing;
//! forwarding jacks are the pass-through points of trunks and trays
//! and simply relay pulses onward.
//!
//! Jack handles are cheap clones of a shared cell; the peer lists hold
//! weak references so that the wiring graph never owns the units it
//! connects (units own their jacks, the graph only links them).

use std::cell::RefCell;
use std::fmt::{self, Display, Formatter};
use std::rc::{Rc, Weak};

use tracing::{event, Level};

use crate::alarm::ConfigurationError;

/// Callback invoked with the jack it is attached to and the pulse
/// value on the wire.
pub type JackHandler = Rc<dyn Fn(&Jack, u16)>;

struct JackInner {
    name: String,
    on_receive: Option<JackHandler>,
    on_transmit: Option<JackHandler>,
    peers: Vec<Weak<RefCell<JackInner>>>,
    disabled: bool,
    visited: bool,
    forward: bool,
}

/// A named patch-cable endpoint.
#[derive(Clone)]
pub struct Jack(Rc<RefCell<JackInner>>);

impl Jack {
    fn new(
        name: &str,
        on_receive: Option<JackHandler>,
        on_transmit: Option<JackHandler>,
        forward: bool,
    ) -> Jack {
        Jack(Rc::new(RefCell::new(JackInner {
            name: name.to_string(),
            on_receive,
            on_transmit,
            peers: Vec::new(),
            disabled: false,
            visited: false,
            forward,
        })))
    }

    /// An input jack which invokes `on_receive` for each arriving
    /// pulse.
    pub fn input(name: &str, on_receive: JackHandler) -> Jack {
        Jack::new(name, Some(on_receive), None, false)
    }

    /// An output-only jack.  It never appears in another jack's
    /// dispatch and exists purely as a transmission origin.
    pub fn output(name: &str) -> Jack {
        Jack::new(name, None, None, false)
    }

    /// An output jack with a post-transmit callback, invoked only
    /// when a transmission actually reached a live receiver.
    pub fn output_with(name: &str, on_transmit: JackHandler) -> Jack {
        Jack::new(name, None, Some(on_transmit), false)
    }

    /// A pass-through jack, as found on trunks and trays: anything
    /// received is relayed to its own peers.
    pub fn forwarding(name: &str) -> Jack {
        Jack::new(name, None, None, true)
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// True if at least one patch cable is plugged into this jack.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.0.borrow().peers.iter().any(|w| w.upgrade().is_some())
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.0.borrow().disabled
    }

    /// Gates dispatch to this jack on or off.  This is an
    /// optimization/guard for inputs known to be unable to legally
    /// fire; it never alters the wiring topology.
    pub fn set_disabled(&self, disabled: bool) {
        self.0.borrow_mut().disabled = disabled;
    }

    #[must_use]
    pub fn is_connected_to(&self, other: &Jack) -> bool {
        self.0
            .borrow()
            .peers
            .iter()
            .any(|w| w.upgrade().is_some_and(|p| Rc::ptr_eq(&p, &other.0)))
    }

    /// Names of every peer, in connection order.  For diagnostics.
    #[must_use]
    pub fn peer_names(&self) -> Vec<String> {
        self.0
            .borrow()
            .peers
            .iter()
            .filter_map(Weak::upgrade)
            .map(|p| p.borrow().name.clone())
            .collect()
    }

    /// Sends `value` on this jack, invoking the receive callback of
    /// each connected live peer and afterwards this jack's own
    /// transmit callback.
    ///
    /// The visited flag breaks cycles: transmission can legitimately
    /// arrive back at a jack it already passed through, for example
    /// when two trunks are patched to each other, and the second
    /// arrival must go nowhere.  The transmit callback fires only if
    /// the pulse reached at least one receiver, matching the physical
    /// fact that a disconnected output produces no observable signal.
    pub fn transmit(&self, value: u16) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.visited {
                return;
            }
            inner.visited = true;
        }
        let peers: Vec<Rc<RefCell<JackInner>>> = self
            .0
            .borrow()
            .peers
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let mut delivered = false;
        for peer in peers {
            let (forward, skip, handler) = {
                let p = peer.borrow();
                (p.forward, p.visited || p.disabled, p.on_receive.clone())
            };
            let peer = Jack(peer);
            if forward {
                delivered = true;
                peer.transmit(value);
            } else if !skip {
                if let Some(handler) = handler {
                    delivered = true;
                    handler(&peer, value);
                }
            }
        }
        if delivered {
            event!(Level::TRACE, jack = %self.name(), value, "pulse");
            let handler = self.0.borrow().on_transmit.clone();
            if let Some(handler) = handler {
                handler(self, value);
            }
        }
        self.0.borrow_mut().visited = false;
    }

    /// Unplugs every cable from this jack.  Idempotent.
    pub fn disconnect(&self) {
        let peers: Vec<Rc<RefCell<JackInner>>> = {
            let mut inner = self.0.borrow_mut();
            let peers = inner.peers.iter().filter_map(Weak::upgrade).collect();
            inner.peers.clear();
            peers
        };
        for peer in peers {
            peer.borrow_mut().peers.retain(|w| match w.upgrade() {
                Some(p) => !Rc::ptr_eq(&p, &self.0),
                None => false,
            });
        }
    }
}

impl Display for Jack {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(&self.name())
    }
}

impl PartialEq for Jack {
    fn eq(&self, other: &Jack) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Patches two jacks together.
///
/// The connection is recorded symmetrically: each jack lists the other
/// as a peer, though delivery only ever happens into jacks which have
/// a receive callback (or forward).  Plugging a cable between the same
/// pair twice, or from a jack to itself, is a configuration error.
pub fn connect(j1: &Jack, j2: &Jack) -> Result<(), ConfigurationError> {
    if Rc::ptr_eq(&j1.0, &j2.0) {
        return Err(ConfigurationError::SelfConnection { jack: j1.name() });
    }
    if j1.is_connected_to(j2) || j2.is_connected_to(j1) {
        return Err(ConfigurationError::AlreadyConnected {
            jack1: j1.name(),
            jack2: j2.name(),
        });
    }
    j1.0.borrow_mut().peers.push(Rc::downgrade(&j2.0));
    j2.0.borrow_mut().peers.push(Rc::downgrade(&j1.0));
    event!(Level::DEBUG, from = %j1.name(), to = %j2.name(), "connect");
    Ok(())
}
