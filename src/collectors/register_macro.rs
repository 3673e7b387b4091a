macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        // Generate the enum with all collector types
        #[derive(Clone)]
        pub enum CollectorType {
            $(
                $collector_type($collector_type),
            )*
        }

        // Processors differ in their fan-out unit, so the enum dispatches
        // through inherent methods instead of implementing `Processor`.
        impl CollectorType {
            #[must_use]
            pub fn name(&self) -> &'static str {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.name(),
                    )*
                }
            }

            /// Register metrics with the prometheus registry.
            ///
            /// # Errors
            ///
            /// Returns an error if any metric fails to register.
            pub fn register_metrics(&self, registry: &Registry) -> Result<()> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.register_metrics(registry),
                    )*
                }
            }

            #[must_use]
            pub fn enabled_by_default(&self) -> bool {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.enabled_by_default(),
                    )*
                }
            }

            #[must_use]
            pub fn live(&self) -> bool {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.live(),
                    )*
                }
            }

            /// Register the processor's families and start its runner.
            ///
            /// # Errors
            ///
            /// Returns an error if metric registration fails.
            pub fn spawn(
                self,
                app: &crate::scheduler::AppContext,
            ) -> Result<tokio::task::JoinHandle<()>> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => app.spawn_runner(c),
                    )*
                }
            }
        }

        // Generate the factory function map
        pub fn all_factories() -> HashMap<&'static str, fn() -> CollectorType> {
            let mut map: HashMap<&'static str, fn() -> CollectorType> = HashMap::new();
            $(
                map.insert(
                    stringify!($module),
                    || CollectorType::$collector_type($collector_type::new()),
                );
            )*
            map
        }

        // Generate array of collector names
        pub const COLLECTOR_NAMES: &[&'static str] = &[
            $(stringify!($module),)*
        ];
    };
}
