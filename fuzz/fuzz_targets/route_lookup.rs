#![no_main]

use beet_events::SenderKind;
use beet_routing::{Call, InvocationKind, RouteTree};
use libfuzzer_sys::fuzz_target;

fn noop(_call: Call) -> std::future::Ready<anyhow::Result<()>> {
    std::future::ready(Ok(()))
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, text)) = data.split_first() else {
        return;
    };
    let text = String::from_utf8_lossy(text);
    let tree = match RouteTree::build(|root| {
        root.on_message_from(SenderKind::Chat, &[], |chat| {
            chat.handle(noop)?;
            chat.intercept(noop)?;
            chat.on_incoming_message(&["бет", "бетховен"], |bot| {
                bot.on_message(&["викторина"], |quiz| {
                    quiz.on_message(&["стоп"], |stop| stop.intercept(noop))?;
                    quiz.intercept(noop)
                })?;
                bot.on_message(&["помощь", "команды"], |help| help.intercept(noop))?;
                bot.on_message(&["о себе", "инфо"], |about| about.intercept(noop))?;
                bot.on_message(&["добавь"], |add| add.intercept(noop))
            })
        })?;
        root.on_message_from(SenderKind::User, &[], |user| {
            user.on_incoming_message(&["добавь"], |add| add.intercept(noop))
        })
    }) {
        Ok(tree) => tree,
        Err(error) => panic!("static route tree rejected: {error}"),
    };

    let kind = match selector % 3 {
        0 => SenderKind::User,
        1 => SenderKind::Chat,
        _ => SenderKind::Community,
    };
    let outbound = selector & 0x80 != 0;
    let invocations = tree.resolve(&text, outbound, kind);

    match kind {
        SenderKind::Community => {
            assert!(invocations.is_empty());
            return;
        }
        SenderKind::User => {
            assert!(invocations.len() <= 1);
            if let Some(add) = invocations.first() {
                assert!(!outbound);
                assert_eq!(add.kind, InvocationKind::Interceptor);
                assert!(text.ends_with(add.route.rest_of_message.as_str()));
            }
            return;
        }
        SenderKind::Chat => {}
    }
    assert!(!invocations.is_empty() && invocations.len() <= 2);
    assert_eq!(invocations[0].kind, InvocationKind::Handler);
    assert_eq!(invocations[0].route.rest_of_message, text);
    if let Some(last) = invocations.get(1) {
        assert_eq!(last.kind, InvocationKind::Interceptor);
        assert!(text.ends_with(last.route.rest_of_message.as_str()));
        assert!(last.route.passed_path.chars().count() <= text.chars().count());
    }
});
