use anyhow::Context;

/// The controller is single-threaded, so it runs on a current-thread runtime.
pub fn block_on<F, Fut>(f: F) -> anyhow::Result<Fut>
where
    F: Future<Output = Fut>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "Failed to build Tokio runtime")?;
    Ok(rt.block_on(f))
}
