//! Embeds git branch, commit and dirty state for `parley::version_string()`.

use vergen_gitcl::{Emitter, Gitcl};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let git = Gitcl::builder().branch(true).sha(true).dirty(true).build();
    Emitter::default().add_instructions(&git)?.emit()?;
    Ok(())
}
