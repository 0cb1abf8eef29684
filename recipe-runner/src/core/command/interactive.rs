//! Interactive-piped family: prompt on stdin, continuation flag when resuming.

use super::{CommandLine, InvocationRequest, PromptDelivery, ToolProfile};

pub(super) fn build(profile: &ToolProfile, request: &InvocationRequest<'_>) -> CommandLine {
    let mut args = profile.args.clone();
    if request.handle.continuing {
        args.extend(profile.continue_args.iter().cloned());
    }
    CommandLine {
        program: profile.program.clone(),
        args,
        prompt: PromptDelivery::Stdin,
    }
}
