/// Configuration for the overall lowering process.
///
/// Only two knobs reach this crate: `allow_conditional_exec` is recorded for
/// the later passes that consume the lowered output (conditional execution is
/// a rewrite over emitted branches, not something the selector does), and
/// `print_lowered_asm` dumps each function as it is produced.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub allow_conditional_exec: bool,
    pub print_lowered_asm: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            allow_conditional_exec: true,
            print_lowered_asm: false,
        }
    }
}
