// ─── define_plugin! ──────────────────────────────────────────────────────────

/// Creates a [`PluginDescriptor`] for a plugin type implementing `Default`.
///
/// # Syntax
///
/// ```rust,ignore
/// use hearth::prelude::*;
///
/// #[derive(Default)]
/// struct Backup { /* … */ }
///
/// #[async_trait]
/// impl Plugin for Backup { /* hooks */ }
///
/// pub static BACKUP: PluginDescriptor = define_plugin!(Backup {
///     id: "backup",
///     name: "Backup",
///     authors: &["Alex"],
///     depends_on: &[("hearth", ">=0.1"), ("scheduler", "^1.2")],
/// });
/// ```
///
/// ## Field reference
///
/// | Field | Required | Default |
/// |-------|----------|---------|
/// | `id` | ✓ | Must be **first**. `[a-z0-9_]{1,64}` |
/// | `version` | — | `CARGO_PKG_VERSION` of the defining crate |
/// | `description` | — | `CARGO_PKG_DESCRIPTION` of the defining crate |
/// | `name` | — | the id |
/// | `authors` | — | none |
/// | `link` | — | none |
/// | `depends_on` | — | `&[(id, semver requirement), …]` |
///
/// Every other field name is a compile error: the fields map one to one onto
/// the `const` builder methods of [`PluginDescriptor`].
///
/// [`PluginDescriptor`]: crate::plugin::PluginDescriptor
#[macro_export]
macro_rules! define_plugin {
    ($ty:ty { id: $id:expr $(, $field:ident : $value:expr)* $(,)? }) => {{
        fn __hearth_plugin_create() -> ::std::boxed::Box<dyn $crate::plugin::Plugin> {
            ::std::boxed::Box::new(<$ty as ::std::default::Default>::default())
        }

        $crate::plugin::PluginDescriptor::new($id, __hearth_plugin_create)
            .version(::std::env!("CARGO_PKG_VERSION"))
            .description(::std::env!("CARGO_PKG_DESCRIPTION"))
            $( .$field($value) )*
    }};
}

// ─── export_plugin! ──────────────────────────────────────────────────────────

/// Declares a descriptor `static` and links it into
/// [`PLUGINS`](crate::plugin::PLUGINS), so
/// [`LinkedPlugins`](crate::plugin::LinkedPlugins) discovers it.
///
/// ```rust,ignore
/// hearth::export_plugin! {
///     pub static BACKUP: PluginDescriptor = define_plugin!(Backup { id: "backup" });
/// }
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($(#[$attr:meta])* $vis:vis static $name:ident : $ty:ty = $init:expr ;) => {
        $(#[$attr])*
        #[$crate::__linkme::distributed_slice($crate::plugin::PLUGINS)]
        #[linkme(crate = $crate::__linkme)]
        $vis static $name: $ty = $init;
    };
}
