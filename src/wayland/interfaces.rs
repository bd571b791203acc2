//! Static descriptions of the protocol interfaces the server speaks.
//!
//! Each [`Interface`] lists its requests in opcode order with their wire signature, the
//! version they appeared in and whether they destroy the object. Events are only listed by
//! name, for logging.

use super::wire::ArgumentType::{self, Fd, Int, NewId, Object, Str, Uint};

/// Description of a single request
#[derive(Debug)]
pub struct MessageDesc {
    /// Request name, as in the protocol XML
    pub name: &'static str,
    /// Argument types in wire order
    pub signature: &'static [ArgumentType],
    /// First interface version carrying this request
    pub since: u32,
    /// Whether the request destroys the object it is sent to
    pub destructor: bool,
}

impl MessageDesc {
    const fn new(name: &'static str, signature: &'static [ArgumentType]) -> Self {
        MessageDesc {
            name,
            signature,
            since: 1,
            destructor: false,
        }
    }

    const fn destructor(name: &'static str) -> Self {
        MessageDesc {
            name,
            signature: &[],
            since: 1,
            destructor: true,
        }
    }

    const fn since(mut self, version: u32) -> Self {
        self.since = version;
        self
    }
}

/// Description of a protocol interface
#[derive(Debug)]
pub struct Interface {
    /// Interface name
    pub name: &'static str,
    /// Highest version implemented by this server
    pub version: u32,
    /// Requests, indexed by opcode
    pub requests: &'static [MessageDesc],
    /// Event names, indexed by opcode
    pub events: &'static [&'static str],
}

impl Interface {
    /// Name of the event with the given opcode, for logging
    pub fn event_name(&self, opcode: u16) -> &'static str {
        self.events.get(opcode as usize).copied().unwrap_or("<unknown>")
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Interface {}

/// `wl_display`
pub static WL_DISPLAY: Interface = Interface {
    name: "wl_display",
    version: 1,
    requests: &[
        MessageDesc::new("sync", &[NewId]),
        MessageDesc::new("get_registry", &[NewId]),
    ],
    events: &["error", "delete_id"],
};

/// `wl_registry`
pub static WL_REGISTRY: Interface = Interface {
    name: "wl_registry",
    version: 1,
    requests: &[MessageDesc::new("bind", &[Uint, Str, Uint, NewId])],
    events: &["global", "global_remove"],
};

/// `wl_callback`
pub static WL_CALLBACK: Interface = Interface {
    name: "wl_callback",
    version: 1,
    requests: &[],
    events: &["done"],
};

/// `wl_compositor`
pub static WL_COMPOSITOR: Interface = Interface {
    name: "wl_compositor",
    version: 4,
    requests: &[
        MessageDesc::new("create_surface", &[NewId]),
        MessageDesc::new("create_region", &[NewId]),
    ],
    events: &[],
};

/// `wl_region`
pub static WL_REGION: Interface = Interface {
    name: "wl_region",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("add", &[Int, Int, Int, Int]),
        MessageDesc::new("subtract", &[Int, Int, Int, Int]),
    ],
    events: &[],
};

/// `wl_surface`
pub static WL_SURFACE: Interface = Interface {
    name: "wl_surface",
    version: 4,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("attach", &[Object, Int, Int]),
        MessageDesc::new("damage", &[Int, Int, Int, Int]),
        MessageDesc::new("frame", &[NewId]),
        MessageDesc::new("set_opaque_region", &[Object]),
        MessageDesc::new("set_input_region", &[Object]),
        MessageDesc::new("commit", &[]),
        MessageDesc::new("set_buffer_transform", &[Int]).since(2),
        MessageDesc::new("set_buffer_scale", &[Int]).since(3),
        MessageDesc::new("damage_buffer", &[Int, Int, Int, Int]).since(4),
    ],
    events: &["enter", "leave"],
};

/// `wl_shm`
pub static WL_SHM: Interface = Interface {
    name: "wl_shm",
    version: 1,
    requests: &[MessageDesc::new("create_pool", &[NewId, Fd, Int])],
    events: &["format"],
};

/// `wl_shm_pool`
pub static WL_SHM_POOL: Interface = Interface {
    name: "wl_shm_pool",
    version: 1,
    requests: &[
        MessageDesc::new("create_buffer", &[NewId, Int, Int, Int, Int, Uint]),
        MessageDesc::destructor("destroy"),
        MessageDesc::new("resize", &[Int]),
    ],
    events: &[],
};

/// `wl_buffer`
pub static WL_BUFFER: Interface = Interface {
    name: "wl_buffer",
    version: 1,
    requests: &[MessageDesc::destructor("destroy")],
    events: &["release"],
};

/// `wl_shell`
pub static WL_SHELL: Interface = Interface {
    name: "wl_shell",
    version: 1,
    requests: &[MessageDesc::new("get_shell_surface", &[NewId, Object])],
    events: &[],
};

/// `wl_shell_surface`
pub static WL_SHELL_SURFACE: Interface = Interface {
    name: "wl_shell_surface",
    version: 1,
    requests: &[
        MessageDesc::new("pong", &[Uint]),
        MessageDesc::new("move", &[Object, Uint]),
        MessageDesc::new("resize", &[Object, Uint, Uint]),
        MessageDesc::new("set_toplevel", &[]),
        MessageDesc::new("set_transient", &[Object, Int, Int, Uint]),
        MessageDesc::new("set_fullscreen", &[Uint, Uint, Object]),
        MessageDesc::new("set_popup", &[Object, Uint, Object, Int, Int, Uint]),
        MessageDesc::new("set_maximized", &[Object]),
        MessageDesc::new("set_title", &[Str]),
        MessageDesc::new("set_class", &[Str]),
    ],
    events: &["ping", "configure", "popup_done"],
};

/// `xdg_wm_base`
pub static XDG_WM_BASE: Interface = Interface {
    name: "xdg_wm_base",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("create_positioner", &[NewId]),
        MessageDesc::new("get_xdg_surface", &[NewId, Object]),
        MessageDesc::new("pong", &[Uint]),
    ],
    events: &["ping"],
};

/// `xdg_positioner`
pub static XDG_POSITIONER: Interface = Interface {
    name: "xdg_positioner",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("set_size", &[Int, Int]),
        MessageDesc::new("set_anchor_rect", &[Int, Int, Int, Int]),
        MessageDesc::new("set_anchor", &[Uint]),
        MessageDesc::new("set_gravity", &[Uint]),
        MessageDesc::new("set_constraint_adjustment", &[Uint]),
        MessageDesc::new("set_offset", &[Int, Int]),
    ],
    events: &[],
};

/// `xdg_surface`
pub static XDG_SURFACE: Interface = Interface {
    name: "xdg_surface",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("get_toplevel", &[NewId]),
        MessageDesc::new("get_popup", &[NewId, Object, Object]),
        MessageDesc::new("set_window_geometry", &[Int, Int, Int, Int]),
        MessageDesc::new("ack_configure", &[Uint]),
    ],
    events: &["configure"],
};

/// `xdg_toplevel`
pub static XDG_TOPLEVEL: Interface = Interface {
    name: "xdg_toplevel",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("set_parent", &[Object]),
        MessageDesc::new("set_title", &[Str]),
        MessageDesc::new("set_app_id", &[Str]),
        MessageDesc::new("show_window_menu", &[Object, Uint, Int, Int]),
        MessageDesc::new("move", &[Object, Uint]),
        MessageDesc::new("resize", &[Object, Uint, Uint]),
        MessageDesc::new("set_max_size", &[Int, Int]),
        MessageDesc::new("set_min_size", &[Int, Int]),
        MessageDesc::new("set_maximized", &[]),
        MessageDesc::new("unset_maximized", &[]),
        MessageDesc::new("set_fullscreen", &[Object]),
        MessageDesc::new("unset_fullscreen", &[]),
        MessageDesc::new("set_minimized", &[]),
    ],
    events: &["configure", "close"],
};

/// `xdg_popup`
pub static XDG_POPUP: Interface = Interface {
    name: "xdg_popup",
    version: 1,
    requests: &[
        MessageDesc::destructor("destroy"),
        MessageDesc::new("grab", &[Object, Uint]),
    ],
    events: &["configure", "popup_done"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructors_carry_no_arguments() {
        for interface in [
            &WL_REGION,
            &WL_SURFACE,
            &WL_SHM_POOL,
            &WL_BUFFER,
            &XDG_WM_BASE,
            &XDG_POSITIONER,
            &XDG_SURFACE,
            &XDG_TOPLEVEL,
            &XDG_POPUP,
        ] {
            for request in interface.requests.iter().filter(|r| r.destructor) {
                assert!(request.signature.is_empty(), "{}.{}", interface.name, request.name);
            }
        }
    }

    #[test]
    fn surface_requests_are_versioned() {
        assert_eq!(WL_SURFACE.requests[7].name, "set_buffer_transform");
        assert_eq!(WL_SURFACE.requests[7].since, 2);
        assert_eq!(WL_SURFACE.requests[9].since, 4);
        assert_eq!(XDG_TOPLEVEL.requests[12].name, "unset_fullscreen");
    }
}
